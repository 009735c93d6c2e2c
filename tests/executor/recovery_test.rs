//! Fault-recovery tests against real `warden-worker` processes.
//!
//! Hangs and crashes only make sense behind a process boundary, so these run
//! the worker binary with a fixture whose elements misbehave on purpose.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::NamedTempFile;
use warden::executor::{ExecutorConfig, OperationExecutor};
use warden::manager::{BackoffPolicy, CommandSpawner, ManagerConfig, ProcessManager};
use warden::protocol::operations::InvokeParams;
use warden::protocol::ErrorCategory;

const FIXTURE: &str = r#"{"elements":[
    {"id":"ok","name":"OK","controlType":"Button","patterns":["Invoke"]},
    {"id":"hang","name":"Frozen","controlType":"Button","patterns":["Invoke"],"behavior":"hang"},
    {"id":"crash","name":"Fatal","controlType":"Button","patterns":["Invoke"],"behavior":"crash"},
    {"id":"slow","name":"Slow","controlType":"Button","patterns":["Invoke"],"delayMs":800}
]}"#;

struct Harness {
    executor: OperationExecutor,
    _fixture: NamedTempFile,
}

fn harness(pool_size: usize, suspect_grace: Duration) -> Harness {
    let mut fixture = NamedTempFile::new().unwrap();
    fixture.write_all(FIXTURE.as_bytes()).unwrap();
    fixture.flush().unwrap();

    let spawner = CommandSpawner::new(env!("CARGO_BIN_EXE_warden-worker"))
        .args(["--desktop".to_string(), fixture.path().display().to_string()])
        .envs([("WARDEN_LOG", "warn")]);

    let config = ManagerConfig {
        pool_size,
        suspect_grace,
        sweep_interval: Duration::from_millis(50),
        shutdown_grace: Duration::from_secs(1),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
            jitter: false,
        },
        ..ManagerConfig::default()
    };
    let manager = ProcessManager::start(config, Arc::new(spawner)).unwrap();
    Harness {
        executor: OperationExecutor::new(manager, ExecutorConfig::default()),
        _fixture: fixture,
    }
}

async fn invoke(executor: &OperationExecutor, id: &str, timeout: Duration) -> warden::protocol::OperationResult {
    executor.execute_typed(&InvokeParams::new(id), timeout).await
}

#[tokio::test]
async fn test_hang_times_out_and_pool_recovers() {
    let h = harness(1, Duration::from_millis(200));

    let started = Instant::now();
    let result = invoke(&h.executor, "hang", Duration::from_secs(1)).await;
    let elapsed = started.elapsed();

    assert_eq!(result.category(), ErrorCategory::Timeout);
    assert!(elapsed >= Duration::from_millis(900), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "deadline overrun: {elapsed:?}");

    let result = invoke(&h.executor, "ok", Duration::from_secs(10)).await;
    assert!(result.success, "replacement worker failed: {result:?}");
    assert_eq!(result.data, Some(json!("Element invoked successfully")));
    assert_eq!(h.executor.manager().stats().spawned_total, 2);

    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_hung_worker_is_killed_after_grace() {
    let h = harness(1, Duration::from_millis(200));

    let result = invoke(&h.executor, "hang", Duration::from_millis(500)).await;
    assert_eq!(result.category(), ErrorCategory::Timeout);
    assert_eq!(h.executor.manager().stats().unresponsive, 1);

    tokio::time::sleep(Duration::from_millis(800)).await;
    let stats = h.executor.manager().stats();
    assert_eq!(stats.unresponsive, 0, "suspect survived its grace: {stats:?}");
    assert_eq!(stats.live, 0);

    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_crash_is_reported_and_pool_recovers() {
    let h = harness(1, Duration::from_secs(2));

    let result = invoke(&h.executor, "crash", Duration::from_secs(10)).await;
    assert!(!result.success);
    assert_eq!(result.category(), ErrorCategory::WorkerCrashed);

    let result = invoke(&h.executor, "ok", Duration::from_secs(10)).await;
    assert!(result.success, "replacement worker failed: {result:?}");

    let stats = h.executor.manager().stats();
    assert_eq!(stats.spawned_total, 2);
    // A success after the restart clears the crash streak.
    assert_eq!(stats.consecutive_crashes, 0);

    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_hang_does_not_block_other_callers() {
    let h = harness(2, Duration::from_millis(200));

    let (hung, ok) = tokio::join!(
        invoke(&h.executor, "hang", Duration::from_secs(2)),
        async {
            let started = Instant::now();
            let result = invoke(&h.executor, "ok", Duration::from_secs(10)).await;
            (result, started.elapsed())
        }
    );

    assert_eq!(hung.category(), ErrorCategory::Timeout);
    let (ok, elapsed) = ok;
    assert!(ok.success);
    assert!(elapsed < Duration::from_secs(2), "healthy call waited on the hang: {elapsed:?}");

    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_late_reply_returns_suspect_to_pool() {
    let h = harness(1, Duration::from_secs(10));

    let result = invoke(&h.executor, "slow", Duration::from_millis(300)).await;
    assert_eq!(result.category(), ErrorCategory::Timeout);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let stats = h.executor.manager().stats();
    assert_eq!(stats.unresponsive, 0, "late reply did not clear suspicion: {stats:?}");
    assert_eq!(stats.ready, 1);

    let result = invoke(&h.executor, "ok", Duration::from_secs(5)).await;
    assert!(result.success);
    assert_eq!(h.executor.manager().stats().spawned_total, 1);

    h.executor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_worker_processes() {
    let h = harness(2, Duration::from_secs(2));

    h.executor.manager().warm_up().await.unwrap();
    assert_eq!(h.executor.manager().stats().ready, 2);

    h.executor.shutdown().await;
    assert_eq!(h.executor.manager().stats().live, 0);
}
