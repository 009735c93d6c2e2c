//! Starting worker processes.
//!
//! The manager never calls `Command` directly; it asks a [`WorkerSpawner`]
//! for a [`SpawnedWorker`] so tests and embedders can substitute in-process
//! workers for real children.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use super::error::SpawnError;
use super::handle::WorkerId;
use super::MANAGER_TARGET;
use crate::transport::{BoxedReader, BoxedWriter};

/// A running worker as handed to the manager.
pub struct SpawnedWorker {
    /// OS process id, when there is one.
    pub pid: Option<u32>,
    /// The worker's stdout.
    pub stdout: BoxedReader,
    /// The worker's stdin.
    pub stdin: BoxedWriter,
    /// Lifecycle control for the process.
    pub process: Box<dyn WorkerProcess>,
}

/// Exit and kill control for a spawned worker.
#[async_trait]
pub trait WorkerProcess: Send {
    /// Wait for the worker to exit, returning its exit code if it has one.
    ///
    /// Must be cancel-safe.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Ask the worker to die without waiting for it.
    fn start_kill(&mut self) -> io::Result<()>;
}

#[async_trait]
impl WorkerProcess for Child {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = Child::wait(self).await?;
        Ok(status.code())
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }
}

/// Factory for worker processes.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Start one worker.
    async fn spawn(&self, id: WorkerId) -> Result<SpawnedWorker, SpawnError>;
}

/// Spawns the worker binary as a child process.
///
/// stdin and stdout carry frames, stderr is inherited so worker logs land in
/// the controller's log stream, and the child is killed if its handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Append arguments passed to every worker.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add environment variables passed to every worker.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerSpawner for CommandSpawner {
    async fn spawn(&self, id: WorkerId) -> Result<SpawnedWorker, SpawnError> {
        debug!(
            target: MANAGER_TARGET,
            worker = %id,
            program = %self.program.display(),
            "spawning worker process"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe("stdout"))?;

        Ok(SpawnedWorker {
            pid: child.id(),
            stdout: Box::new(stdout),
            stdin: Box::new(stdin),
            process: Box::new(child),
        })
    }
}
