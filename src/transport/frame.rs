//! Newline-delimited JSON framing.
//!
//! One frame is one compact JSON document followed by `\n`. `serde_json`
//! escapes control characters inside strings, so a serialized frame never
//! contains a raw newline and the line boundary is unambiguous. Binary data
//! must be base64-encoded by the caller before it is placed in a frame.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{FrameError, TransportError, TransportResult};

/// Default upper bound for a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Serialize a frame into its wire bytes, including the trailing newline.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Reads frames from a buffered byte stream.
///
/// The three read outcomes a caller must tell apart map to:
/// - a pending future: no data yet, keep waiting;
/// - `Ok(None)`: the stream closed (the peer exited);
/// - `Err(e)` with `e.is_malformed()`: the peer wrote garbage.
pub struct FrameReader<R> {
    reader: R,
    line: String,
    max_bytes: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    /// Create a reader with the default frame limit.
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a reader with a custom frame limit.
    pub fn with_limit(reader: R, max_bytes: usize) -> Self {
        Self {
            reader,
            line: String::new(),
            max_bytes,
        }
    }

    /// Read the next frame, skipping blank lines.
    pub async fn next_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        loop {
            self.line.clear();
            let limit = self.max_bytes as u64 + 1;
            let read = (&mut self.reader)
                .take(limit)
                .read_line(&mut self.line)
                .await
                .map_err(|err| match err.kind() {
                    io::ErrorKind::InvalidData => FrameError::Malformed {
                        message: "frame is not valid UTF-8".to_string(),
                        line: String::new(),
                    },
                    _ => FrameError::Io(err),
                })?;

            if read == 0 {
                return Ok(None);
            }

            if !self.line.ends_with('\n') && read as u64 >= limit {
                return Err(FrameError::Oversized {
                    limit: self.max_bytes,
                });
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|err| FrameError::Malformed {
                    message: err.to_string(),
                    line: trimmed.to_string(),
                });
        }
    }
}

/// Writes frames to a byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame and flush it.
    pub async fn write_frame<T: Serialize>(&mut self, frame: &T) -> TransportResult<()> {
        let bytes = encode_frame(frame).map_err(TransportError::SerializeFailed)?;
        self.writer
            .write_all(&bytes)
            .await
            .map_err(TransportError::WriteFailed)?;
        self.writer
            .flush()
            .await
            .map_err(TransportError::WriteFailed)
    }

    /// Close the write half, signalling end-of-input to the peer.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
