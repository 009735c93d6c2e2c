//! Controller-side facade for running operations in worker processes.
//!
//! [`OperationExecutor::execute`] never fails and never blocks past the
//! caller's deadline: every outcome, including hangs and crashes, comes back
//! as an [`OperationResult`]. The deadline covers waiting for a worker,
//! writing the request and waiting for the reply.
//!
//! | Outcome                          | Category              | Worker          |
//! |----------------------------------|-----------------------|-----------------|
//! | request over the frame limit     | `Validation`          | none leased     |
//! | reply                            | as reported           | released        |
//! | deadline while queued            | `Timeout`             | none leased     |
//! | deadline while waiting for reply | `Timeout`             | marked suspect  |
//! | output closed                    | `WorkerCrashed`       | forgotten       |
//! | malformed output                 | `WorkerFault`         | retired         |
//! | write failed, worker gone        | `WorkerCrashed`       | forgotten       |
//! | write failed, worker alive       | `Transport`           | retired         |
//! | spawn failed                     | `WorkerFault`         | none leased     |

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{field, info, info_span, warn, Instrument, Span};

use crate::manager::{ManagerError, ProcessManager};
use crate::protocol::{
    new_correlation_id, ErrorCategory, OperationParams, OperationRequest, OperationResult,
    Parameters, WorkerFrame,
};
use crate::transport::{encode_frame, Received, DEFAULT_MAX_FRAME_BYTES};

/// Tracing target for operation execution.
const EXECUTOR_TARGET: &str = "warden::executor";

/// Per-call limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Used by [`OperationExecutor::execute_default`].
    pub default_timeout: Duration,
    /// Longest deadline a caller may ask for.
    pub max_timeout: Duration,
    /// Largest request frame a worker will read, newline excluded.
    pub max_frame_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(300),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Runs operations against pooled worker processes.
///
/// Cheap to share behind an `Arc`; concurrent callers are serialized only by
/// the pool's capacity.
pub struct OperationExecutor {
    manager: Arc<ProcessManager>,
    config: ExecutorConfig,
}

/// What happened to a leased call before the lease is handed back.
enum Outcome {
    Reply(OperationResult),
    TimedOut,
    Crashed(String),
    Malformed(String),
    WriteFailed(String),
}

impl OperationExecutor {
    pub fn new(manager: Arc<ProcessManager>, config: ExecutorConfig) -> Self {
        Self { manager, config }
    }

    pub fn manager(&self) -> &Arc<ProcessManager> {
        &self.manager
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one operation with a deadline in whole seconds.
    ///
    /// A non-positive or over-limit timeout is a local `Validation` failure
    /// and nothing is sent to a worker.
    pub async fn execute(
        &self,
        operation_name: &str,
        parameters: Parameters,
        timeout_seconds: i64,
    ) -> OperationResult {
        if timeout_seconds <= 0 {
            return self.reject(
                operation_name,
                format!("timeoutSeconds must be positive, got {timeout_seconds}"),
            );
        }
        let timeout = Duration::from_secs(timeout_seconds.unsigned_abs());
        self.execute_with_timeout(operation_name, parameters, timeout)
            .await
    }

    /// Run one operation with the configured default deadline.
    pub async fn execute_default(&self, operation_name: &str, parameters: Parameters) -> OperationResult {
        self.execute_with_timeout(operation_name, parameters, self.config.default_timeout)
            .await
    }

    /// Run one operation with an arbitrary deadline.
    pub async fn execute_with_timeout(
        &self,
        operation_name: &str,
        parameters: Parameters,
        timeout: Duration,
    ) -> OperationResult {
        if operation_name.trim().is_empty() {
            return self.reject(operation_name, "operation name must not be empty".to_string());
        }
        if let Err(message) = self.check_timeout(timeout) {
            return self.reject(operation_name, message);
        }

        let request = OperationRequest::new(operation_name, parameters, wire_seconds(timeout));
        let correlation_id = request.correlation_id.clone();
        let frame = WorkerFrame::Request(request);
        if let Err(message) = self.check_frame_size(&frame) {
            return self.reject(operation_name, message);
        }
        self.run(operation_name, correlation_id, frame, timeout).await
    }

    /// Run the operation bound to a parameter type.
    pub async fn execute_typed<P: OperationParams>(&self, params: &P, timeout: Duration) -> OperationResult {
        let name = P::OPERATION.as_str();
        match params.to_parameters() {
            Ok(parameters) => self.execute_with_timeout(name, parameters, timeout).await,
            Err(err) => self.reject(name, format!("failed to encode parameters: {err}")),
        }
    }

    /// Round-trip a health probe through a pooled worker.
    pub async fn ping(&self, timeout: Duration) -> OperationResult {
        if let Err(message) = self.check_timeout(timeout) {
            return self.reject("ping", message);
        }
        let correlation_id = new_correlation_id();
        let frame = WorkerFrame::Ping {
            correlation_id: correlation_id.clone(),
        };
        self.run("ping", correlation_id, frame, timeout).await
    }

    /// Stop the worker pool.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    fn check_timeout(&self, timeout: Duration) -> Result<(), String> {
        if timeout.is_zero() {
            return Err("timeout must be positive".to_string());
        }
        if timeout > self.config.max_timeout {
            return Err(format!(
                "timeout of {}s exceeds the maximum of {}s",
                timeout.as_secs_f64(),
                self.config.max_timeout.as_secs()
            ));
        }
        Ok(())
    }

    /// Workers drop frames over their limit without answering.
    fn check_frame_size(&self, frame: &WorkerFrame) -> Result<(), String> {
        let encoded = encode_frame(frame).map_err(|err| format!("failed to encode request: {err}"))?;
        let size = encoded.len().saturating_sub(1);
        if size > self.config.max_frame_bytes {
            return Err(format!(
                "request of {size} bytes exceeds the frame limit of {} bytes",
                self.config.max_frame_bytes
            ));
        }
        Ok(())
    }

    fn reject(&self, operation_name: &str, message: String) -> OperationResult {
        let correlation_id = new_correlation_id();
        warn!(
            target: EXECUTOR_TARGET,
            correlation_id = %correlation_id,
            operation = operation_name,
            error = %message,
            "rejected operation before dispatch"
        );
        OperationResult::failure(correlation_id, ErrorCategory::Validation, message)
    }

    async fn run(
        &self,
        operation_name: &str,
        correlation_id: String,
        frame: WorkerFrame,
        timeout: Duration,
    ) -> OperationResult {
        let span = info_span!(
            target: EXECUTOR_TARGET,
            "operation",
            correlation_id = %correlation_id,
            operation = operation_name,
            worker = field::Empty,
        );

        async move {
            let started = std::time::Instant::now();
            let result = self.dispatch(&correlation_id, &frame, timeout).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if result.is_success() || result.category().is_capability_reported() {
                info!(
                    target: EXECUTOR_TARGET,
                    elapsed_ms,
                    success = result.success,
                    category = %result.category(),
                    "operation completed"
                );
            } else {
                warn!(
                    target: EXECUTOR_TARGET,
                    elapsed_ms,
                    category = %result.category(),
                    error = result.error_message.as_deref().unwrap_or_default(),
                    "operation failed"
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, correlation_id: &str, frame: &WorkerFrame, timeout: Duration) -> OperationResult {
        let deadline = Instant::now() + timeout;

        let lease = match tokio::time::timeout_at(deadline, self.manager.acquire()).await {
            Ok(Ok(lease)) => lease,
            Ok(Err(ManagerError::ShuttingDown)) => {
                return OperationResult::failure(
                    correlation_id,
                    ErrorCategory::WorkerFault,
                    "process manager is shutting down",
                );
            }
            Ok(Err(err)) => {
                return OperationResult::failure(
                    correlation_id,
                    ErrorCategory::WorkerFault,
                    format!("failed to start worker: {err}"),
                );
            }
            Err(_) => {
                return OperationResult::failure(
                    correlation_id,
                    ErrorCategory::Timeout,
                    format!("timed out after {}ms waiting for a worker", timeout.as_millis()),
                );
            }
        };

        let outcome = {
            let Some(handle) = lease.handle() else {
                return OperationResult::failure(
                    correlation_id,
                    ErrorCategory::WorkerFault,
                    "lease carries no worker",
                );
            };
            Span::current().record("worker", handle.id().get());
            let channel = handle.channel();

            let pending = channel.register(correlation_id);
            match tokio::time::timeout_at(deadline, channel.send(frame)).await {
                Err(_) => Outcome::TimedOut,
                Ok(Err(err)) if err.is_broken_pipe() || !channel.is_alive() => {
                    Outcome::Crashed(format!("worker process is gone: {err}"))
                }
                Ok(Err(err)) => Outcome::WriteFailed(err.to_string()),
                Ok(Ok(())) => {
                    let cancel = CancellationToken::new();
                    let _timer = DeadlineTimer::arm(cancel.clone(), deadline);
                    match channel.receive(pending, &cancel).await {
                        Received::Reply(result) => Outcome::Reply(result),
                        Received::Cancelled => Outcome::TimedOut,
                        Received::Closed => {
                            Outcome::Crashed("worker process exited during the operation".to_string())
                        }
                        Received::Malformed(message) => Outcome::Malformed(message),
                    }
                }
            }
        };

        match outcome {
            Outcome::Reply(result) => {
                if result.is_success() {
                    self.manager.record_success();
                }
                self.manager.release(lease);
                result
            }
            Outcome::TimedOut => {
                self.manager.mark_suspect(lease);
                OperationResult::failure(
                    correlation_id,
                    ErrorCategory::Timeout,
                    format!("operation timed out after {}ms", timeout.as_millis()),
                )
            }
            Outcome::Crashed(message) => {
                self.manager.report_crash(lease, &message);
                OperationResult::failure(correlation_id, ErrorCategory::WorkerCrashed, message)
            }
            Outcome::Malformed(message) => {
                self.manager.retire(lease, "malformed output");
                OperationResult::failure(
                    correlation_id,
                    ErrorCategory::WorkerFault,
                    format!("worker returned malformed output: {message}"),
                )
            }
            Outcome::WriteFailed(message) => {
                self.manager.retire(lease, "request write failed");
                OperationResult::failure(
                    correlation_id,
                    ErrorCategory::Transport,
                    format!("failed to send request: {message}"),
                )
            }
        }
    }
}

/// Fires a cancellation token at a deadline unless dropped first.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn arm(token: CancellationToken, deadline: Instant) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            token.cancel();
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Whole seconds advertised to the worker, rounded up.
fn wire_seconds(timeout: Duration) -> u64 {
    timeout.as_secs_f64().ceil().max(1.0) as u64
}
