//! Worker-side error types.

use std::fmt;

use thiserror::Error;

use crate::protocol::{ErrorCategory, Pattern};
use crate::transport::{FrameError, TransportError};

/// Result type for the worker loop.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that stop the worker loop.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to read from stdin.
    #[error("failed to read from controller: {0}")]
    ReadFailed(#[source] FrameError),

    /// Failed to write a result to stdout.
    #[error("failed to write to controller: {0}")]
    WriteFailed(#[source] TransportError),

    /// The desktop fixture could not be loaded.
    #[error("failed to load desktop fixture: {0}")]
    Fixture(String),
}

/// Failure reported by a native capability.
///
/// Only these variants cross the process boundary as ordinary results. A
/// handler panic is reported as a worker fault; anything that kills the
/// process is detected by the controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityFault {
    /// No element with this id exists.
    #[error("element not found: {0}")]
    NotFound(String),

    /// The element does not expose the pattern the operation needs.
    #[error("element '{element_id}' does not support the {pattern} pattern")]
    PatternUnsupported {
        element_id: String,
        pattern: Pattern,
    },

    /// The arguments are not acceptable for this element.
    #[error("{0}")]
    InvalidArgument(String),

    /// The native call failed.
    #[error("{0}")]
    Failed(String),
}

impl CapabilityFault {
    pub fn invalid(message: impl fmt::Display) -> Self {
        Self::InvalidArgument(message.to_string())
    }

    /// Result category this fault is reported under.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CapabilityFault::NotFound(_) => ErrorCategory::ElementNotFound,
            CapabilityFault::PatternUnsupported { .. } => ErrorCategory::PatternNotSupported,
            CapabilityFault::InvalidArgument(_) => ErrorCategory::Validation,
            CapabilityFault::Failed(_) => ErrorCategory::WorkerFault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_categories() {
        assert_eq!(
            CapabilityFault::NotFound("x".into()).category(),
            ErrorCategory::ElementNotFound
        );
        assert_eq!(
            CapabilityFault::PatternUnsupported {
                element_id: "x".into(),
                pattern: Pattern::Toggle,
            }
            .category(),
            ErrorCategory::PatternNotSupported
        );
        assert_eq!(CapabilityFault::invalid("bad").category(), ErrorCategory::Validation);
        assert_eq!(CapabilityFault::Failed("boom".into()).category(), ErrorCategory::WorkerFault);
    }

    #[test]
    fn test_pattern_fault_message() {
        let fault = CapabilityFault::PatternUnsupported {
            element_id: "lbl1".into(),
            pattern: Pattern::Invoke,
        };
        assert_eq!(fault.to_string(), "element 'lbl1' does not support the Invoke pattern");
    }
}
