//! The boundary to the native accessibility API.

use serde_json::Value;

use super::error::CapabilityFault;
use crate::protocol::OperationCall;

/// A native accessibility backend.
///
/// `invoke` runs on a blocking thread and may never return; the controller
/// enforces deadlines by abandoning the whole worker process.
pub trait NativeCapability: Send + Sync + 'static {
    /// Perform one decoded operation and return its payload.
    fn invoke(&self, call: &OperationCall) -> Result<Value, CapabilityFault>;
}
