//! Transport error types.

use std::io;

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failure to read one frame from a byte stream.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The line was not valid JSON for the expected frame type.
    #[error("malformed frame: {message}")]
    Malformed {
        /// Parser message.
        message: String,
        /// Raw line, trimmed, for diagnostics.
        line: String,
    },

    /// The line exceeded the configured frame limit.
    #[error("frame exceeds {limit} bytes")]
    Oversized {
        /// The limit in bytes.
        limit: usize,
    },

    /// Reading from the underlying stream failed.
    #[error("failed to read frame: {0}")]
    Io(#[source] io::Error),
}

impl FrameError {
    /// Whether the peer sent bytes that cannot be trusted.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::Oversized { .. })
    }
}

/// Errors that can occur while talking to a worker.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to serialize a frame to JSON.
    #[error("failed to serialize frame: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to write to worker stdin.
    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    /// The channel is already closed (worker exited or output was rejected).
    #[error("worker channel is closed")]
    Closed,
}

impl TransportError {
    /// Whether the error indicates the peer is gone.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::WriteFailed(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
            ),
            Self::Closed => true,
            Self::SerializeFailed(_) => false,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializeFailed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_pipe_classification() {
        let broken = TransportError::WriteFailed(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(broken.is_broken_pipe());
        assert!(TransportError::Closed.is_broken_pipe());

        let other = TransportError::WriteFailed(io::Error::other("disk on fire"));
        assert!(!other.is_broken_pipe());
    }

    #[test]
    fn test_malformed_classification() {
        let malformed = FrameError::Malformed {
            message: "expected value".into(),
            line: "garbage".into(),
        };
        assert!(malformed.is_malformed());
        assert!(FrameError::Oversized { limit: 8 }.is_malformed());
        assert!(!FrameError::Io(io::Error::other("x")).is_malformed());
    }
}
