//! Process manager error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::handle::WorkerId;

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Failure to start a worker process.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to start the program.
    #[error("failed to launch worker '{program}': {source}")]
    Launch {
        /// Program that was executed.
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The child started without the expected pipe.
    #[error("worker started without a {0} pipe")]
    MissingPipe(&'static str),
}

/// Errors surfaced by the [`ProcessManager`](super::ProcessManager).
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The manager configuration cannot work.
    #[error("invalid manager configuration: {0}")]
    InvalidConfig(String),

    /// A worker could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The manager is shutting down and hands out no more workers.
    #[error("process manager is shutting down")]
    ShuttingDown,

    /// A freshly started worker failed its readiness probe.
    #[error("{worker} failed its readiness probe: {reason}")]
    Unhealthy {
        /// The worker that failed.
        worker: WorkerId,
        /// What went wrong.
        reason: String,
    },
}
