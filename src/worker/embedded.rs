//! In-process workers.
//!
//! [`InProcessSpawner`] runs the worker loop as a Tokio task connected to the
//! manager through in-memory pipes instead of a child process. The loop,
//! framing and supervision are the same as for real workers; only process
//! isolation is lost, so a native call that hangs or kills the process takes
//! the host down with it.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::duplex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::capability::NativeCapability;
use super::{WorkerLoop, WORKER_TARGET};
use crate::manager::{SpawnError, SpawnedWorker, WorkerId, WorkerProcess, WorkerSpawner};

/// Pipe buffer between the manager and an in-process worker.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A worker running as a Tokio task.
///
/// Killing aborts the task, which drops its end of the pipes.
pub struct EmbeddedProcess {
    task: JoinHandle<()>,
}

impl EmbeddedProcess {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }
}

#[async_trait]
impl WorkerProcess for EmbeddedProcess {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        match (&mut self.task).await {
            Ok(()) => Ok(Some(0)),
            Err(err) if err.is_cancelled() => Ok(None),
            Err(err) => Err(io::Error::other(err.to_string())),
        }
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.task.abort();
        Ok(())
    }
}

/// Spawns workers as tasks sharing one native capability.
pub struct InProcessSpawner {
    capability: Arc<dyn NativeCapability>,
    max_frame_bytes: usize,
}

impl InProcessSpawner {
    pub fn new(capability: Arc<dyn NativeCapability>, max_frame_bytes: usize) -> Self {
        Self {
            capability,
            max_frame_bytes,
        }
    }
}

#[async_trait]
impl WorkerSpawner for InProcessSpawner {
    async fn spawn(&self, id: WorkerId) -> Result<SpawnedWorker, SpawnError> {
        let (controller_in, worker_in) = duplex(PIPE_CAPACITY);
        let (worker_out, controller_out) = duplex(PIPE_CAPACITY);

        let worker = WorkerLoop::new(self.capability.clone()).with_max_frame_bytes(self.max_frame_bytes);
        let task = tokio::spawn(async move {
            match worker.run(worker_in, worker_out).await {
                Ok(reason) => debug!(target: WORKER_TARGET, worker = %id, ?reason, "in-process worker stopped"),
                Err(err) => debug!(target: WORKER_TARGET, worker = %id, error = %err, "in-process worker failed"),
            }
        });

        Ok(SpawnedWorker {
            pid: None,
            stdout: Box::new(controller_out),
            stdin: Box::new(controller_in),
            process: Box::new(EmbeddedProcess::new(task)),
        })
    }
}
