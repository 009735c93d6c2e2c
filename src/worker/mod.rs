//! The worker side of the engine.
//!
//! A worker reads [`WorkerFrame`]s from its stdin one at a time and answers
//! every request and ping with exactly one [`OperationResult`] on stdout,
//! carrying the same correlation id, before it reads the next frame. Logs go
//! to stderr.
//!
//! # Architecture
//!
//! ```text
//! stdin ──▶ FrameReader ──▶ OperationCall::decode ──▶ spawn_blocking(NativeCapability::invoke)
//!                                                              │
//! stdout ◀── FrameWriter ◀── OperationResult ◀─────────────────┘
//! ```
//!
//! Faults the capability reports come back as ordinary results; see
//! [`CapabilityFault::category`]. A panic in the handler is caught at the
//! blocking-task boundary and reported as `WorkerFault`. A fault that takes
//! the process down is left for the controller to detect.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::protocol::{
    ErrorCategory, OperationCall, OperationRequest, OperationResult, WorkerFrame, PONG,
};
use crate::transport::{FrameError, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};

mod capability;
pub mod embedded;
mod error;
pub mod scripted;

pub use capability::NativeCapability;
pub use embedded::{EmbeddedProcess, InProcessSpawner};
pub use error::{CapabilityFault, WorkerError, WorkerResult};
pub use scripted::ScriptedDesktop;

/// Tracing target for the worker process.
pub(crate) const WORKER_TARGET: &str = "warden::worker";

/// Why the worker loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The controller sent a shutdown frame.
    Shutdown,
    /// stdin reached end-of-file.
    EndOfInput,
}

/// Request loop of one worker process.
pub struct WorkerLoop {
    capability: Arc<dyn NativeCapability>,
    max_frame_bytes: usize,
}

impl WorkerLoop {
    pub fn new(capability: Arc<dyn NativeCapability>) -> Self {
        Self {
            capability,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Serve frames from `input` until shutdown or end-of-input.
    ///
    /// Returns an error only when the streams themselves fail.
    pub async fn run<R, W>(&self, input: R, output: W) -> WorkerResult<ExitReason>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut frames = FrameReader::with_limit(BufReader::new(input), self.max_frame_bytes);
        let mut writer = FrameWriter::new(output);
        debug!(target: WORKER_TARGET, "worker loop started");

        loop {
            let raw = match frames.next_frame::<Value>().await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    info!(target: WORKER_TARGET, "stdin closed, exiting");
                    return Ok(ExitReason::EndOfInput);
                }
                Err(FrameError::Io(err)) => return Err(WorkerError::ReadFailed(FrameError::Io(err))),
                Err(err) => {
                    warn!(target: WORKER_TARGET, error = %err, "skipping unreadable frame");
                    continue;
                }
            };

            let salvaged = raw
                .get("correlationId")
                .and_then(Value::as_str)
                .map(str::to_string);

            let result = match serde_json::from_value::<WorkerFrame>(raw) {
                Ok(WorkerFrame::Shutdown) => {
                    info!(target: WORKER_TARGET, "shutdown requested, exiting");
                    return Ok(ExitReason::Shutdown);
                }
                Ok(WorkerFrame::Ping { correlation_id }) => OperationResult::success(correlation_id, PONG),
                Ok(WorkerFrame::Request(request)) => {
                    let span = info_span!(
                        target: WORKER_TARGET,
                        "request",
                        correlation_id = %request.correlation_id,
                        operation = %request.operation_name,
                    );
                    self.handle(request).instrument(span).await
                }
                Err(err) => match salvaged {
                    Some(correlation_id) => {
                        warn!(
                            target: WORKER_TARGET,
                            correlation_id = %correlation_id,
                            error = %err,
                            "rejecting invalid frame"
                        );
                        OperationResult::failure(
                            correlation_id,
                            ErrorCategory::Validation,
                            format!("invalid frame: {err}"),
                        )
                    }
                    None => {
                        warn!(target: WORKER_TARGET, error = %err, "skipping frame without correlation id");
                        continue;
                    }
                },
            };

            writer
                .write_frame(&result)
                .await
                .map_err(WorkerError::WriteFailed)?;
        }
    }

    /// Decode and execute one request.
    pub async fn handle(&self, request: OperationRequest) -> OperationResult {
        let OperationRequest {
            operation_name,
            parameters,
            correlation_id,
            ..
        } = request;

        let call = match OperationCall::decode(&operation_name, &parameters) {
            Ok(call) => call,
            Err(err) => {
                warn!(target: WORKER_TARGET, error = %err, "rejecting request");
                return OperationResult::failure(correlation_id, ErrorCategory::Validation, err.to_string());
            }
        };

        let capability = self.capability.clone();
        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || capability.invoke(&call)).await;

        let result = match outcome {
            Ok(Ok(data)) => OperationResult::success(correlation_id, data),
            Ok(Err(fault)) => OperationResult::failure(correlation_id, fault.category(), fault.to_string()),
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                warn!(target: WORKER_TARGET, panic = %message, "native call panicked");
                OperationResult::failure(
                    correlation_id,
                    ErrorCategory::WorkerFault,
                    format!("native call panicked: {message}"),
                )
            }
            Err(err) => OperationResult::failure(correlation_id, ErrorCategory::WorkerFault, err.to_string()),
        };

        debug!(
            target: WORKER_TARGET,
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = result.success,
            category = %result.category(),
            "request handled"
        );
        result
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
