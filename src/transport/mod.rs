//! Byte-stream transport between the controller and worker processes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     WorkerChannel                            │
//! │  send(frame) ──▶ FrameWriter ──▶ worker stdin (NDJSON)       │
//! │                                                              │
//! │  reader task ◀── FrameReader ◀── worker stdout (NDJSON)      │
//! │      │                                                       │
//! │      ├─ reply with waiter    ──▶ PendingReply (oneshot)      │
//! │      ├─ reply without waiter ──▶ ChannelEvent::LateReply     │
//! │      ├─ EOF                  ──▶ waiters Closed + event      │
//! │      └─ garbage              ──▶ waiters Malformed + event   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every wait takes a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! so no read blocks past the caller's deadline.

mod channel;
mod error;
mod frame;

pub use channel::{BoxedReader, BoxedWriter, ChannelEvent, PendingReply, Received, WorkerChannel};
pub use error::{FrameError, TransportError, TransportResult};
pub use frame::{encode_frame, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};
