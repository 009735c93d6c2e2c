//! Envelope types exchanged between the controller and worker processes.
//!
//! Every frame on the wire is a single compact JSON object terminated by a
//! newline. The controller writes [`WorkerFrame`]s to the worker's stdin and
//! the worker answers each request (or ping) with exactly one
//! [`OperationResult`] on its stdout. Both ends are built from this module, so
//! field names carry no version negotiation.
//!
//! ```text
//! controller ──{"kind":"request","operationName":"Invoke",...}──▶ worker
//! controller ◀──{"success":true,"data":"Element invoked successfully",...}── worker
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod element;
pub mod operations;

pub use element::{
    BoundingRect, ElementSnapshot, ExpandCollapseState, Pattern, ScrollAmount, ToggleState,
    WindowVisualState,
};
pub use operations::{DecodeError, Operation, OperationCall, OperationParams};

/// Parameter bag carried by a request.
///
/// A `BTreeMap` keeps the serialized key order stable, which makes frames
/// reproducible in logs and snapshots.
pub type Parameters = BTreeMap<String, Value>;

// ============================================================================
// Request / Result Envelope
// ============================================================================

/// A single operation request sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Operation name, one of the [`Operation`] catalogue names.
    pub operation_name: String,
    /// Operation-specific parameters.
    #[serde(default)]
    pub parameters: Parameters,
    /// Deadline the controller applies to this request.
    pub timeout_seconds: u64,
    /// Unique id pairing this request with its result.
    pub correlation_id: String,
}

impl OperationRequest {
    /// Create a request with a fresh correlation id.
    pub fn new(
        operation_name: impl Into<String>,
        parameters: Parameters,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            parameters,
            timeout_seconds,
            correlation_id: new_correlation_id(),
        }
    }
}

/// Generate a correlation id (UUID v4).
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Failure classification carried by every [`OperationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The operation succeeded.
    #[default]
    None,
    /// The target element does not exist.
    ElementNotFound,
    /// The element exists but does not support the required pattern.
    PatternNotSupported,
    /// The request was malformed.
    Validation,
    /// The deadline elapsed before a reply arrived.
    Timeout,
    /// The worker process exited while the request was in flight.
    WorkerCrashed,
    /// The worker is alive but misbehaved (bad output, handler panic, spawn failure).
    WorkerFault,
    /// Channel I/O failed for reasons not attributable to either endpoint.
    Transport,
}

impl ErrorCategory {
    /// Name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::None => "None",
            ErrorCategory::ElementNotFound => "ElementNotFound",
            ErrorCategory::PatternNotSupported => "PatternNotSupported",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::WorkerCrashed => "WorkerCrashed",
            ErrorCategory::WorkerFault => "WorkerFault",
            ErrorCategory::Transport => "Transport",
        }
    }

    /// Whether the failure was reported by the native capability itself.
    ///
    /// These are expected outcomes; the caller may retry with different
    /// parameters on the same worker.
    pub fn is_capability_reported(&self) -> bool {
        matches!(
            self,
            ErrorCategory::ElementNotFound | ErrorCategory::PatternNotSupported
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one request, produced exactly once.
///
/// Either the worker writes it or the executor synthesizes it when no genuine
/// reply can be obtained (timeout, crash, transport failure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Result payload (present on success, may be null).
    #[serde(default)]
    pub data: Option<Value>,
    /// Human-readable error (present on failure).
    #[serde(default)]
    pub error_message: Option<String>,
    /// Failure classification; `None` on success.
    #[serde(default)]
    pub error_category: ErrorCategory,
    /// Correlation id of the request this answers.
    pub correlation_id: String,
}

impl OperationResult {
    /// Build a successful result.
    pub fn success(correlation_id: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error_message: None,
            error_category: ErrorCategory::None,
            correlation_id: correlation_id.into(),
        }
    }

    /// Build a failed result.
    pub fn failure(
        correlation_id: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
            error_category: category,
            correlation_id: correlation_id.into(),
        }
    }

    /// Whether this result reports success.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The failure classification.
    pub fn category(&self) -> ErrorCategory {
        self.error_category
    }
}

// ============================================================================
// Controller -> Worker Frames
// ============================================================================

/// Frame written by the controller to a worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// Execute one operation.
    Request(OperationRequest),
    /// Health probe; answered with a successful `"pong"` result.
    #[serde(rename_all = "camelCase")]
    Ping {
        /// Correlation id echoed in the reply.
        correlation_id: String,
    },
    /// Ask the worker to exit cleanly.
    Shutdown,
}

impl WorkerFrame {
    /// Correlation id the worker must answer with, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            WorkerFrame::Request(request) => Some(&request.correlation_id),
            WorkerFrame::Ping { correlation_id } => Some(correlation_id),
            WorkerFrame::Shutdown => None,
        }
    }
}

/// Payload carried by a successful ping reply.
pub const PONG: &str = "pong";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_camel_case() {
        let mut parameters = Parameters::new();
        parameters.insert("elementId".to_string(), json!("btn1"));
        let request = OperationRequest {
            operation_name: "Invoke".to_string(),
            parameters,
            timeout_seconds: 5,
            correlation_id: "c-1".to_string(),
        };

        let value = serde_json::to_value(WorkerFrame::Request(request)).unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["operationName"], "Invoke");
        assert_eq!(value["timeoutSeconds"], 5);
        assert_eq!(value["correlationId"], "c-1");
        assert_eq!(value["parameters"]["elementId"], "btn1");
    }

    #[test]
    fn test_result_defaults_missing_fields() {
        let json = r#"{"success":true,"data":"ok","correlationId":"c-2"}"#;
        let result: OperationResult = serde_json::from_str(json).unwrap();

        assert!(result.is_success());
        assert_eq!(result.category(), ErrorCategory::None);
        assert_eq!(result.error_message, None);
        assert_eq!(result.data, Some(json!("ok")));
    }

    #[test]
    fn test_failure_result_round_trips_category() {
        let result = OperationResult::failure("c-3", ErrorCategory::ElementNotFound, "no such element");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""errorCategory":"ElementNotFound""#));
        assert!(json.contains(r#""data":null"#));

        let back: OperationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_ping_and_shutdown_frames() {
        let ping: WorkerFrame = serde_json::from_str(r#"{"kind":"ping","correlationId":"p"}"#).unwrap();
        assert_eq!(ping.correlation_id(), Some("p"));

        let shutdown: WorkerFrame = serde_json::from_str(r#"{"kind":"shutdown"}"#).unwrap();
        assert_eq!(shutdown, WorkerFrame::Shutdown);
        assert_eq!(shutdown.correlation_id(), None);
    }

    #[test]
    fn test_capability_reported_categories() {
        assert!(ErrorCategory::ElementNotFound.is_capability_reported());
        assert!(ErrorCategory::PatternNotSupported.is_capability_reported());
        assert!(!ErrorCategory::Timeout.is_capability_reported());
        assert!(!ErrorCategory::WorkerCrashed.is_capability_reported());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = OperationRequest::new("Invoke", Parameters::new(), 1);
        let b = OperationRequest::new("Invoke", Parameters::new(), 1);
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
