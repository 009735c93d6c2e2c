//! Per-worker duplex channel with correlation-id demultiplexing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{FrameError, TransportError, TransportResult};
use super::frame::{FrameReader, FrameWriter};
use crate::protocol::{OperationResult, WorkerFrame};

/// Tracing target for transport operations.
const TRANSPORT_TARGET: &str = "warden::transport";

/// Read half handed to a channel (a worker's stdout).
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half handed to a channel (a worker's stdin).
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Something the reader task observed that the owner of the worker must
/// act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A reply arrived for a correlation id nobody is waiting on any more.
    LateReply {
        /// The orphaned correlation id.
        correlation_id: String,
    },
    /// The worker's output stream ended.
    Closed,
    /// The worker wrote data that is not a valid result frame.
    Malformed {
        /// Description of the bad data.
        message: String,
    },
}

/// What the reader task hands to one waiter.
#[derive(Debug)]
enum Delivery {
    Reply(OperationResult),
    Closed,
    Malformed(String),
}

/// Outcome of waiting for one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// The worker answered.
    Reply(OperationResult),
    /// The worker's output stream closed before it answered.
    Closed,
    /// The worker wrote malformed output.
    Malformed(String),
    /// The caller's cancellation signal fired first.
    Cancelled,
}

type PendingMap = DashMap<String, oneshot::Sender<Delivery>>;

/// A registered interest in one correlation id.
///
/// Dropping it without receiving deregisters the id, so a reply that arrives
/// later is treated as late and discarded.
pub struct PendingReply {
    correlation_id: String,
    rx: oneshot::Receiver<Delivery>,
    pending: Arc<PendingMap>,
}

impl PendingReply {
    /// The correlation id this waiter is registered for.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

/// Duplex NDJSON channel to one worker process.
///
/// Writes are serialized through an async mutex. A background task owns the
/// read half and routes each [`OperationResult`] to the waiter registered for
/// its correlation id; everything else is reported through the event callback.
pub struct WorkerChannel {
    writer: Mutex<Option<FrameWriter<BoxedWriter>>>,
    pending: Arc<PendingMap>,
    open: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl WorkerChannel {
    /// Wrap a worker's stdout/stdin and start the reader task.
    ///
    /// `on_event` is invoked from the reader task; it must not block.
    pub fn new<F>(reader: BoxedReader, writer: BoxedWriter, max_frame_bytes: usize, on_event: F) -> Self
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let open = Arc::new(AtomicBool::new(true));
        let frames = FrameReader::with_limit(BufReader::new(reader), max_frame_bytes);
        let reader_task = tokio::spawn(read_replies(frames, pending.clone(), open.clone(), on_event));

        Self {
            writer: Mutex::new(Some(FrameWriter::new(writer))),
            pending,
            open,
            reader_task,
        }
    }

    /// Register a waiter for `correlation_id`. Must happen before the
    /// request is sent so a fast reply cannot be missed.
    pub fn register(&self, correlation_id: &str) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.to_string(), tx);

        // The reader drains the map after clearing `open`; if it already has,
        // drop our sender so the waiter resolves as closed.
        if !self.open.load(Ordering::SeqCst) {
            self.pending.remove(correlation_id);
        }

        PendingReply {
            correlation_id: correlation_id.to_string(),
            rx,
            pending: self.pending.clone(),
        }
    }

    /// Write one frame to the worker.
    pub async fn send(&self, frame: &WorkerFrame) -> TransportResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_frame(frame).await
    }

    /// Wait for the reply registered by `pending`, or for `cancel`.
    pub async fn receive(&self, mut pending: PendingReply, cancel: &CancellationToken) -> Received {
        tokio::select! {
            biased;
            delivery = &mut pending.rx => match delivery {
                Ok(Delivery::Reply(result)) => Received::Reply(result),
                Ok(Delivery::Malformed(message)) => Received::Malformed(message),
                Ok(Delivery::Closed) | Err(_) => Received::Closed,
            },
            _ = cancel.cancelled() => Received::Cancelled,
        }
    }

    /// Whether the worker's output stream is still being read.
    pub fn is_alive(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.reader_task.is_finished()
    }

    /// Number of registered waiters.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Close the write half so the worker sees end-of-input.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            if let Err(err) = writer.close().await {
                debug!(target: TRANSPORT_TARGET, error = %err, "closing worker stdin failed");
            }
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_replies<F>(
    mut frames: FrameReader<BufReader<BoxedReader>>,
    pending: Arc<PendingMap>,
    open: Arc<AtomicBool>,
    on_event: F,
) where
    F: Fn(ChannelEvent) + Send + Sync + 'static,
{
    let terminal = loop {
        match frames.next_frame::<OperationResult>().await {
            Ok(Some(result)) => {
                let correlation_id = result.correlation_id.clone();
                let delivered = match pending.remove(&correlation_id) {
                    Some((_, tx)) => tx.send(Delivery::Reply(result)).is_ok(),
                    None => false,
                };
                if !delivered {
                    debug!(
                        target: TRANSPORT_TARGET,
                        correlation_id = %correlation_id,
                        "discarding reply with no waiter"
                    );
                    on_event(ChannelEvent::LateReply { correlation_id });
                }
            }
            Ok(None) => break ChannelEvent::Closed,
            Err(FrameError::Io(err)) => {
                warn!(target: TRANSPORT_TARGET, error = %err, "worker read failed");
                break ChannelEvent::Closed;
            }
            Err(err) => {
                warn!(target: TRANSPORT_TARGET, error = %err, "worker wrote malformed output");
                break ChannelEvent::Malformed {
                    message: err.to_string(),
                };
            }
        }
    };

    open.store(false, Ordering::SeqCst);

    let waiting: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
    for correlation_id in waiting {
        if let Some((_, tx)) = pending.remove(&correlation_id) {
            let delivery = match &terminal {
                ChannelEvent::Malformed { message } => Delivery::Malformed(message.clone()),
                _ => Delivery::Closed,
            };
            let _ = tx.send(delivery);
        }
    }

    on_event(terminal);
}
