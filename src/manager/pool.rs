//! The worker pool and its supervisor task.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::CrashHistory;
use super::error::{ManagerError, ManagerResult};
use super::handle::{WorkerHandle, WorkerId, WorkerLease, WorkerState};
use super::spawner::{SpawnedWorker, WorkerProcess, WorkerSpawner};
use super::{ManagerConfig, MANAGER_TARGET};
use crate::protocol::{new_correlation_id, WorkerFrame};
use crate::transport::{ChannelEvent, Received, WorkerChannel};

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Workers spawned since the manager started.
    pub spawned_total: u64,
    /// Workers currently tracked.
    pub live: usize,
    /// Spawns still in progress.
    pub starting: usize,
    pub ready: usize,
    pub busy: usize,
    pub unresponsive: usize,
    /// Killed or exited workers whose process exit has not been observed yet.
    pub terminating: usize,
    /// Crashes since the last successful call.
    pub consecutive_crashes: u32,
    /// Leases that can be granted without waiting.
    pub available_permits: usize,
}

struct WorkerEntry {
    handle: Arc<WorkerHandle>,
    state: WorkerState,
    last_activity: Instant,
    suspect_since: Option<Instant>,
    /// A reply arrived after its waiter gave up while the worker was leased.
    late_reply: bool,
}

#[derive(Default)]
struct Pool {
    workers: BTreeMap<WorkerId, WorkerEntry>,
    /// Ids whose spawn has not finished.
    starting: BTreeSet<WorkerId>,
    /// Removed from the pool, waiting for the process to go away.
    terminated: BTreeMap<WorkerId, Arc<WorkerHandle>>,
    idle: VecDeque<WorkerId>,
    crashes: CrashHistory,
    shutting_down: bool,
}

impl Pool {
    fn healthy_count(&self) -> usize {
        let running = self
            .workers
            .values()
            .filter(|entry| entry.state.is_healthy())
            .count();
        running + self.starting.len()
    }
}

/// Clears a `Starting` mark when its spawn ends, including when the
/// acquiring future is dropped mid-spawn.
struct StartingMark<'a> {
    manager: &'a ProcessManager,
    id: WorkerId,
}

impl Drop for StartingMark<'_> {
    fn drop(&mut self) {
        self.manager.lock_pool().starting.remove(&self.id);
    }
}

enum SupervisorEvent {
    Channel { worker: WorkerId, event: ChannelEvent },
    Exited { worker: WorkerId, code: Option<i32> },
}

/// Owns the worker processes.
///
/// Capacity is a FIFO semaphore sized to the pool: a lease carries one permit,
/// so with every permit out the next caller queues instead of spawning.
/// Suspect workers give their permit back, which bounds live processes by
/// the pool size plus the suspects still inside their grace window.
///
/// All membership changes happen under one mutex. Must be started from
/// within a Tokio runtime.
pub struct ProcessManager {
    config: ManagerConfig,
    spawner: Arc<dyn WorkerSpawner>,
    permits: Arc<Semaphore>,
    pool: Mutex<Pool>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    next_id: AtomicU64,
    spawned_total: AtomicU64,
    stop: CancellationToken,
}

impl ProcessManager {
    /// Validate the configuration and start the supervisor task.
    pub fn start(config: ManagerConfig, spawner: Arc<dyn WorkerSpawner>) -> ManagerResult<Arc<Self>> {
        config.validate()?;

        let (events, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.pool_size)),
            config,
            spawner,
            pool: Mutex::new(Pool::default()),
            events,
            next_id: AtomicU64::new(1),
            spawned_total: AtomicU64::new(0),
            stop: CancellationToken::new(),
        });

        tokio::spawn(supervise(
            Arc::downgrade(&manager),
            rx,
            manager.stop.clone(),
            manager.config.sweep_interval,
        ));

        info!(
            target: MANAGER_TARGET,
            pool_size = manager.config.pool_size,
            "process manager started"
        );
        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Lease a worker, waiting in FIFO order if the pool is at capacity.
    ///
    /// Reuses an idle worker when one is ready, otherwise spawns one (after
    /// any crash backoff). Spawn failures are returned, not retried.
    pub async fn acquire(self: &Arc<Self>) -> ManagerResult<WorkerLease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ManagerError::ShuttingDown)?;

        if let Some(handle) = self.checkout_idle() {
            debug!(target: MANAGER_TARGET, worker = %handle.id(), "reusing idle worker");
            return Ok(self.lease(handle, permit));
        }

        self.wait_for_backoff().await;
        let handle = self.spawn_worker().await?;
        Ok(self.lease(handle, permit))
    }

    /// Hand a worker back after a completed call.
    pub fn release(&self, mut lease: WorkerLease) {
        if let Some(handle) = lease.take_handle() {
            self.return_worker(handle);
        }
    }

    /// Hand a worker back after its call missed the deadline.
    ///
    /// The worker stops counting toward capacity and is killed once the
    /// grace window passes, unless it answers late first.
    pub fn mark_suspect(&self, mut lease: WorkerLease) {
        let Some(handle) = lease.take_handle() else {
            return;
        };
        let id = handle.id();
        let alive = handle.channel().is_alive();

        let mut guard = self.lock_pool();
        let pool = &mut *guard;
        let Some(entry) = pool.workers.get_mut(&id) else {
            return;
        };

        if entry.late_reply && alive {
            entry.state = WorkerState::Ready;
            entry.late_reply = false;
            entry.last_activity = Instant::now();
            pool.idle.push_back(id);
            debug!(
                target: MANAGER_TARGET,
                worker = %id,
                "reply arrived just after the deadline, worker stays in the pool"
            );
            return;
        }

        entry.state = WorkerState::Unresponsive;
        entry.suspect_since = Some(Instant::now());
        warn!(
            target: MANAGER_TARGET,
            worker = %id,
            grace_ms = self.config.suspect_grace.as_millis() as u64,
            "worker missed its deadline, marked unresponsive"
        );
    }

    /// Remove a worker from the pool and kill it.
    pub fn retire(&self, mut lease: WorkerLease, reason: &str) {
        if let Some(handle) = lease.take_handle() {
            let mut guard = self.lock_pool();
            self.terminate_locked(&mut guard, handle.id(), reason);
        }
    }

    /// Hand back a worker whose process died during the call.
    ///
    /// Counted toward the crash backoff.
    pub fn report_crash(&self, mut lease: WorkerLease, reason: &str) {
        if let Some(handle) = lease.take_handle() {
            let mut guard = self.lock_pool();
            self.forget_locked(&mut guard, handle.id(), reason);
        }
    }

    /// Record a successful call, resetting the crash backoff.
    pub fn record_success(&self) {
        self.lock_pool().crashes.reset();
    }

    /// Fill the pool to capacity, probing each worker with a ping.
    ///
    /// Returns the number of workers probed.
    pub async fn warm_up(self: &Arc<Self>) -> ManagerResult<usize> {
        let mut leases = Vec::with_capacity(self.config.pool_size);
        for _ in 0..self.config.pool_size {
            leases.push(self.acquire().await?);
        }

        let count = leases.len();
        for lease in leases {
            self.probe(lease).await?;
        }

        info!(target: MANAGER_TARGET, workers = count, "worker pool warmed up");
        Ok(count)
    }

    /// Stop handing out workers and stop every worker process.
    ///
    /// Queued and future `acquire` calls fail with
    /// [`ManagerError::ShuttingDown`]. Workers get a shutdown frame and
    /// end-of-input, then the grace period, then a kill.
    pub async fn shutdown(&self) {
        self.permits.close();

        let (handles, terminated): (Vec<Arc<WorkerHandle>>, Vec<Arc<WorkerHandle>>) = {
            let mut guard = self.lock_pool();
            guard.shutting_down = true;
            guard.idle.clear();
            let handles = std::mem::take(&mut guard.workers)
                .into_values()
                .map(|entry| entry.handle)
                .collect();
            (handles, guard.terminated.values().cloned().collect())
        };

        info!(
            target: MANAGER_TARGET,
            workers = handles.len(),
            "shutting down worker pool"
        );

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        for handle in &handles {
            let channel = handle.channel();
            if channel.is_alive() {
                if let Ok(Err(err)) =
                    tokio::time::timeout_at(deadline, channel.send(&WorkerFrame::Shutdown)).await
                {
                    debug!(
                        target: MANAGER_TARGET,
                        worker = %handle.id(),
                        error = %err,
                        "failed to send shutdown frame"
                    );
                }
            }
            let _ = tokio::time::timeout_at(deadline, channel.close()).await;
        }

        let exits = join_all(handles.iter().map(|handle| handle.wait_exited()));
        if tokio::time::timeout_at(deadline, exits).await.is_err() {
            let survivors: Vec<&Arc<WorkerHandle>> =
                handles.iter().filter(|handle| !handle.has_exited()).collect();
            warn!(
                target: MANAGER_TARGET,
                survivors = survivors.len(),
                "workers did not exit within the grace period, killing"
            );
            for handle in &survivors {
                handle.kill();
            }
            let reaped = join_all(survivors.iter().map(|handle| handle.wait_exited()));
            let _ = tokio::time::timeout(self.config.shutdown_grace, reaped).await;
        }

        let reaped = join_all(terminated.iter().map(|handle| handle.wait_exited()));
        let _ = tokio::time::timeout(self.config.shutdown_grace, reaped).await;
        self.lock_pool().terminated.clear();

        self.stop.cancel();
        info!(target: MANAGER_TARGET, "worker pool shut down");
    }

    /// Current pool counters.
    pub fn stats(&self) -> PoolStats {
        let pool = self.lock_pool();
        let count = |state: WorkerState| {
            pool.workers
                .values()
                .filter(|entry| entry.state == state)
                .count()
        };

        PoolStats {
            spawned_total: self.spawned_total.load(Ordering::SeqCst),
            live: pool.workers.len(),
            starting: pool.starting.len(),
            ready: count(WorkerState::Ready),
            busy: count(WorkerState::Busy),
            unresponsive: count(WorkerState::Unresponsive),
            terminating: pool.terminated.len(),
            consecutive_crashes: pool.crashes.consecutive(),
            available_permits: self.permits.available_permits(),
        }
    }

    /// State of one worker, or `None` once its process is gone.
    pub fn worker_state(&self, id: WorkerId) -> Option<WorkerState> {
        let pool = self.lock_pool();
        if pool.starting.contains(&id) {
            return Some(WorkerState::Starting);
        }
        if let Some(entry) = pool.workers.get(&id) {
            return Some(entry.state);
        }
        pool.terminated
            .contains_key(&id)
            .then_some(WorkerState::Terminated)
    }

    /// How long a worker has been idle or busy in its current state.
    pub fn idle_for(&self, id: WorkerId) -> Option<Duration> {
        self.lock_pool()
            .workers
            .get(&id)
            .map(|entry| entry.last_activity.elapsed())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lease(self: &Arc<Self>, handle: Arc<WorkerHandle>, permit: OwnedSemaphorePermit) -> WorkerLease {
        WorkerLease {
            handle: Some(handle),
            permit: Some(permit),
            manager: Arc::downgrade(self),
        }
    }

    fn checkout_idle(&self) -> Option<Arc<WorkerHandle>> {
        let mut guard = self.lock_pool();
        let pool = &mut *guard;

        while let Some(id) = pool.idle.pop_front() {
            let alive = match pool.workers.get(&id) {
                Some(entry) if entry.state == WorkerState::Ready => entry.handle.channel().is_alive(),
                _ => continue,
            };
            if !alive {
                self.forget_locked(pool, id, "output closed while idle");
                continue;
            }
            if let Some(entry) = pool.workers.get_mut(&id) {
                entry.state = WorkerState::Busy;
                entry.late_reply = false;
                entry.last_activity = Instant::now();
                return Some(entry.handle.clone());
            }
        }
        None
    }

    async fn wait_for_backoff(&self) {
        let delay = self.lock_pool().crashes.remaining(&self.config.backoff);
        if delay.is_zero() {
            return;
        }

        info!(
            target: MANAGER_TARGET,
            delay_ms = delay.as_millis() as u64,
            "delaying worker restart after crash"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.stop.cancelled() => {}
        }
    }

    async fn spawn_worker(&self) -> ManagerResult<Arc<WorkerHandle>> {
        if self.lock_pool().shutting_down {
            return Err(ManagerError::ShuttingDown);
        }

        let id = WorkerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.lock_pool().starting.insert(id);
        let _starting = StartingMark { manager: self, id };

        let SpawnedWorker {
            pid,
            stdout,
            stdin,
            process,
        } = self.spawner.spawn(id).await.map_err(|err| {
            warn!(target: MANAGER_TARGET, worker = %id, error = %err, "failed to spawn worker");
            err
        })?;

        let events = self.events.clone();
        let channel = WorkerChannel::new(stdout, stdin, self.config.max_frame_bytes, move |event| {
            let _ = events.send(SupervisorEvent::Channel { worker: id, event });
        });

        let kill = CancellationToken::new();
        let exited = CancellationToken::new();
        tokio::spawn(monitor(
            id,
            process,
            kill.clone(),
            exited.clone(),
            self.events.clone(),
        ));

        let handle = Arc::new(WorkerHandle::new(id, pid, channel, kill, exited));
        self.spawned_total.fetch_add(1, Ordering::SeqCst);

        let mut pool = self.lock_pool();
        pool.starting.remove(&id);
        if pool.shutting_down {
            handle.kill();
            return Err(ManagerError::ShuttingDown);
        }
        pool.workers.insert(
            id,
            WorkerEntry {
                handle: handle.clone(),
                state: WorkerState::Busy,
                last_activity: Instant::now(),
                suspect_since: None,
                late_reply: false,
            },
        );

        info!(target: MANAGER_TARGET, worker = %id, pid = ?pid, "worker started");
        Ok(handle)
    }

    /// Put a leased worker back into the idle queue.
    pub(crate) fn return_worker(&self, handle: Arc<WorkerHandle>) {
        let id = handle.id();
        let alive = handle.channel().is_alive();

        let mut guard = self.lock_pool();
        let pool = &mut *guard;
        if !pool.workers.contains_key(&id) {
            return;
        }
        if !alive {
            self.forget_locked(pool, id, "output closed while leased");
            return;
        }

        if let Some(entry) = pool.workers.get_mut(&id) {
            entry.state = WorkerState::Ready;
            entry.suspect_since = None;
            entry.late_reply = false;
            entry.last_activity = Instant::now();
            pool.idle.push_back(id);
        }
    }

    async fn probe(&self, lease: WorkerLease) -> ManagerResult<()> {
        let (id, outcome) = {
            let Some(handle) = lease.handle() else {
                return Ok(());
            };
            let channel = handle.channel();
            let correlation_id = new_correlation_id();
            let pending = channel.register(&correlation_id);

            let outcome = match channel.send(&WorkerFrame::Ping { correlation_id }).await {
                Err(err) => Err(err.to_string()),
                Ok(()) => {
                    let never = CancellationToken::new();
                    match tokio::time::timeout(
                        self.config.startup_timeout,
                        channel.receive(pending, &never),
                    )
                    .await
                    {
                        Ok(Received::Reply(result)) if result.is_success() => Ok(()),
                        Ok(Received::Reply(result)) => Err(result
                            .error_message
                            .unwrap_or_else(|| "ping failed".to_string())),
                        Ok(Received::Closed) => Err("worker exited during startup".to_string()),
                        Ok(Received::Malformed(message)) => Err(message),
                        Ok(Received::Cancelled) | Err(_) => {
                            Err("no reply within the startup timeout".to_string())
                        }
                    }
                }
            };
            (handle.id(), outcome)
        };

        match outcome {
            Ok(()) => {
                self.release(lease);
                Ok(())
            }
            Err(reason) => {
                self.retire(lease, &reason);
                Err(ManagerError::Unhealthy { worker: id, reason })
            }
        }
    }

    fn handle_event(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Channel {
                worker,
                event: ChannelEvent::LateReply { correlation_id },
            } => self.on_late_reply(worker, &correlation_id),
            SupervisorEvent::Channel {
                worker,
                event: ChannelEvent::Closed,
            } => {
                let mut guard = self.lock_pool();
                self.forget_locked(&mut guard, worker, "output closed");
            }
            SupervisorEvent::Channel {
                worker,
                event: ChannelEvent::Malformed { message },
            } => {
                let mut guard = self.lock_pool();
                self.terminate_locked(&mut guard, worker, &format!("malformed output: {message}"));
            }
            SupervisorEvent::Exited { worker, code } => {
                debug!(target: MANAGER_TARGET, worker = %worker, code = ?code, "worker process exited");
                let mut guard = self.lock_pool();
                self.forget_locked(&mut guard, worker, "process exited");
                guard.terminated.remove(&worker);
            }
        }
    }

    fn on_late_reply(&self, worker: WorkerId, correlation_id: &str) {
        let mut guard = self.lock_pool();
        let pool = &mut *guard;
        let healthy = pool.healthy_count();
        let shutting_down = pool.shutting_down;

        let Some(entry) = pool.workers.get_mut(&worker) else {
            return;
        };

        match entry.state {
            WorkerState::Unresponsive => {
                if healthy < self.config.pool_size
                    && !shutting_down
                    && entry.handle.channel().is_alive()
                {
                    entry.state = WorkerState::Ready;
                    entry.suspect_since = None;
                    entry.last_activity = Instant::now();
                    pool.idle.push_back(worker);
                    info!(
                        target: MANAGER_TARGET,
                        worker = %worker,
                        correlation_id,
                        "unresponsive worker answered late, returned to the pool"
                    );
                } else {
                    self.terminate_locked(pool, worker, "answered late into a full pool");
                }
            }
            WorkerState::Busy => entry.late_reply = true,
            state => debug!(
                target: MANAGER_TARGET,
                worker = %worker,
                state = %state,
                correlation_id,
                "ignoring late reply"
            ),
        }
    }

    /// Kill suspects past their grace window and drop workers that died idle.
    fn sweep(&self) {
        let now = Instant::now();
        let grace = self.config.suspect_grace;

        let mut guard = self.lock_pool();
        let pool = &mut *guard;

        let expired: Vec<WorkerId> = pool
            .workers
            .iter()
            .filter(|(_, entry)| {
                entry.state == WorkerState::Unresponsive
                    && entry
                        .suspect_since
                        .is_some_and(|since| now.duration_since(since) >= grace)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.terminate_locked(pool, id, "unresponsive past the grace window");
        }

        let dead: Vec<WorkerId> = pool
            .workers
            .iter()
            .filter(|(_, entry)| entry.state != WorkerState::Busy && entry.handle.has_exited())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.forget_locked(pool, id, "process exited");
        }

        pool.terminated.retain(|_, handle| !handle.has_exited());
    }

    /// Remove a worker on purpose and kill it. Not counted as a crash.
    fn terminate_locked(&self, pool: &mut Pool, id: WorkerId, reason: &str) {
        let Some(entry) = pool.workers.remove(&id) else {
            return;
        };
        pool.idle.retain(|idle| *idle != id);
        entry.handle.kill();
        warn!(
            target: MANAGER_TARGET,
            worker = %id,
            state = %entry.state,
            reason,
            "terminating worker"
        );
        pool.terminated.insert(id, entry.handle);
    }

    /// Remove a worker that went away on its own. Counted as a crash.
    fn forget_locked(&self, pool: &mut Pool, id: WorkerId, reason: &str) {
        let Some(entry) = pool.workers.remove(&id) else {
            return;
        };
        pool.idle.retain(|idle| *idle != id);
        entry.handle.kill();
        let state = entry.state;
        pool.terminated.insert(id, entry.handle);

        if pool.shutting_down {
            return;
        }
        pool.crashes.record_crash();
        warn!(
            target: MANAGER_TARGET,
            worker = %id,
            state = %state,
            reason,
            consecutive_crashes = pool.crashes.consecutive(),
            "worker exited unexpectedly"
        );
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.stop.cancel();
        let pool = self.pool.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in pool.workers.values() {
            entry.handle.kill();
        }
    }
}

async fn supervise(
    manager: Weak<ProcessManager>,
    mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    stop: CancellationToken,
    sweep_interval: Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let Some(manager) = manager.upgrade() else { break };
                manager.handle_event(event);
            }
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else { break };
                manager.sweep();
            }
        }
    }

    debug!(target: MANAGER_TARGET, "supervisor stopped");
}

/// Waits for one worker process to exit, killing it on request.
async fn monitor(
    id: WorkerId,
    mut process: Box<dyn WorkerProcess>,
    kill: CancellationToken,
    exited: CancellationToken,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) {
    let waited = tokio::select! {
        status = process.wait() => Some(status),
        _ = kill.cancelled() => None,
    };

    let status = match waited {
        Some(status) => status,
        None => {
            if let Err(err) = process.start_kill() {
                warn!(target: MANAGER_TARGET, worker = %id, error = %err, "failed to kill worker");
            }
            process.wait().await
        }
    };

    let code = match status {
        Ok(code) => code,
        Err(err) => {
            warn!(target: MANAGER_TARGET, worker = %id, error = %err, "failed to wait for worker");
            None
        }
    };

    exited.cancel();
    let _ = events.send(SupervisorEvent::Exited { worker: id, code });
}
