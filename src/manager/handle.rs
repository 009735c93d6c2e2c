//! Worker handles and leases.

use std::fmt;
use std::sync::Weak;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use super::pool::ProcessManager;
use crate::transport::WorkerChannel;

/// Identifier of one worker within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Spawn in progress.
    Starting,
    /// Idle and healthy.
    Ready,
    /// Serving exactly one request under a lease.
    Busy,
    /// Missed a deadline; killed once the grace window passes.
    Unresponsive,
    /// Out of the pool, killed or exited; reported until the process exit
    /// is observed. Never reused.
    Terminated,
}

impl WorkerState {
    /// Whether the worker counts toward the pool's healthy complement.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Starting | Self::Ready | Self::Busy)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Unresponsive => "unresponsive",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// The manager's view of one worker process.
///
/// Mutable lifecycle state lives in the manager's pool table; the handle
/// itself only carries what never changes after spawn.
pub struct WorkerHandle {
    id: WorkerId,
    pid: Option<u32>,
    channel: WorkerChannel,
    spawned_at: Instant,
    kill: CancellationToken,
    exited: CancellationToken,
}

impl WorkerHandle {
    pub(crate) fn new(
        id: WorkerId,
        pid: Option<u32>,
        channel: WorkerChannel,
        kill: CancellationToken,
        exited: CancellationToken,
    ) -> Self {
        Self {
            id,
            pid,
            channel,
            spawned_at: Instant::now(),
            kill,
            exited,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// OS process id.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn channel(&self) -> &WorkerChannel {
        &self.channel
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.spawned_at.elapsed()
    }

    /// Whether the process has exited.
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Ask the monitor task to kill the process.
    pub(crate) fn kill(&self) {
        self.kill.cancel();
    }

    /// Resolves once the process has exited.
    pub(crate) async fn wait_exited(&self) {
        self.exited.cancelled().await
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("alive", &self.channel.is_alive())
            .finish()
    }
}

/// Exclusive use of one worker for one call.
///
/// Holds one pool permit. Hand it back with
/// [`ProcessManager::release`], [`ProcessManager::mark_suspect`] or
/// [`ProcessManager::retire`]; dropping it behaves like `release`.
pub struct WorkerLease {
    pub(crate) handle: Option<std::sync::Arc<WorkerHandle>>,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
    pub(crate) manager: Weak<ProcessManager>,
}

impl WorkerLease {
    /// The leased worker's id.
    pub fn id(&self) -> Option<WorkerId> {
        self.handle.as_ref().map(|handle| handle.id())
    }

    /// The leased worker.
    ///
    /// Present until the lease is handed back.
    pub fn handle(&self) -> Option<&WorkerHandle> {
        self.handle.as_deref()
    }

    pub(crate) fn take_handle(&mut self) -> Option<std::sync::Arc<WorkerHandle>> {
        self.handle.take()
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Some(manager) = self.manager.upgrade() {
                manager.return_worker(handle);
            }
        }
        // The worker is back in the idle queue before the permit frees a waiter.
        drop(self.permit.take());
    }
}

impl fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLease")
            .field("worker", &self.id())
            .finish()
    }
}
