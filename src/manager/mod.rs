//! Worker process lifecycle and pooling.
//!
//! The [`ProcessManager`] owns every worker process. Callers borrow a worker
//! through a [`WorkerLease`] for exactly one call and hand it back in one of
//! three ways:
//!
//! - [`ProcessManager::release`]: the call finished, the worker is reusable;
//! - [`ProcessManager::mark_suspect`]: the call missed its deadline;
//! - [`ProcessManager::retire`]: the worker misbehaved and must go.
//!
//! A supervisor task reacts to channel events and process exits and sweeps
//! suspect workers once their grace window has passed:
//!
//! ```text
//!          spawn done              release
//!  Starting ─────────▶ Busy ◀──────────────▶ Ready
//!                       │                      ▲
//!          mark_suspect │          late reply  │
//!                       ▼                      │
//!                 Unresponsive ────────────────┘
//!                       │ grace elapsed
//!                       ▼
//!                  Terminated ◀── crash / malformed output / retire
//!                       │ process exit observed
//!                       ▼
//!                    removed
//! ```

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::transport::DEFAULT_MAX_FRAME_BYTES;

mod backoff;
mod error;
mod handle;
mod pool;
mod spawner;

pub use backoff::BackoffPolicy;
pub use error::{ManagerError, ManagerResult, SpawnError};
pub use handle::{WorkerHandle, WorkerId, WorkerLease, WorkerState};
pub use pool::{PoolStats, ProcessManager};
pub use spawner::{CommandSpawner, SpawnedWorker, WorkerProcess, WorkerSpawner};

/// Tracing target for worker lifecycle events.
pub(crate) const MANAGER_TARGET: &str = "warden::manager";

/// Runtime configuration of a [`ProcessManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Maximum number of workers leased at once.
    pub pool_size: usize,
    /// How long an unresponsive worker may live before it is killed.
    pub suspect_grace: Duration,
    /// Supervisor sweep period.
    pub sweep_interval: Duration,
    /// How long shutdown waits for workers to exit on their own.
    pub shutdown_grace: Duration,
    /// Deadline for the readiness probe during warm-up.
    pub startup_timeout: Duration,
    /// Largest frame accepted from a worker.
    pub max_frame_bytes: usize,
    /// Restart delay after crashes.
    pub backoff: BackoffPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            suspect_grace: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(3),
            startup_timeout: Duration::from_secs(10),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Reject configurations the manager cannot run with.
    pub fn validate(&self) -> ManagerResult<()> {
        if self.pool_size == 0 {
            return Err(ManagerError::InvalidConfig(
                "pool size must be at least 1".to_string(),
            ));
        }
        if self.pool_size > Semaphore::MAX_PERMITS {
            return Err(ManagerError::InvalidConfig(format!(
                "pool size {} exceeds the maximum of {}",
                self.pool_size,
                Semaphore::MAX_PERMITS
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(ManagerError::InvalidConfig(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ManagerError::InvalidConfig(
                "max frame size must be greater than zero".to_string(),
            ));
        }
        if self.backoff.initial > self.backoff.max {
            return Err(ManagerError::InvalidConfig(
                "initial backoff exceeds the maximum backoff".to_string(),
            ));
        }
        Ok(())
    }
}
