//! Pool capacity and lifecycle tests through the public manager API.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use warden::manager::{ManagerConfig, ManagerError, ProcessManager, WorkerState};
use warden::worker::{InProcessSpawner, ScriptedDesktop};

fn manager(pool_size: usize) -> Arc<ProcessManager> {
    let config = ManagerConfig {
        pool_size,
        ..ManagerConfig::default()
    };
    let spawner = InProcessSpawner::new(Arc::new(ScriptedDesktop::demo()), config.max_frame_bytes);
    ProcessManager::start(config, Arc::new(spawner)).unwrap()
}

#[tokio::test]
async fn test_caller_beyond_pool_size_waits_for_a_release() {
    let manager = manager(2);
    let first = manager.acquire().await.unwrap();
    let second = manager.acquire().await.unwrap();
    assert_ne!(first.id(), second.id());

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished(), "third caller should wait at capacity");

    let released = first.id();
    drop(first);

    let third = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(third.id(), released);
    assert_eq!(manager.stats().spawned_total, 2);

    drop(second);
    drop(third);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let manager = manager(1);
    let held = manager.acquire().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut waiters = Vec::new();
    for n in 0..3 {
        let manager = manager.clone();
        let tx = tx.clone();
        waiters.push(tokio::spawn(async move {
            let lease = manager.acquire().await.unwrap();
            tx.send(n).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(lease);
        }));
        // Let each waiter queue before the next one arrives.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(tx);

    drop(held);
    for waiter in waiters {
        waiter.await.unwrap();
    }

    let mut order = Vec::new();
    while let Some(n) = rx.recv().await {
        order.push(n);
    }
    assert_eq!(order, vec![0, 1, 2]);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_worker_state_follows_the_lease() {
    let manager = manager(1);

    let lease = manager.acquire().await.unwrap();
    let id = lease.id().unwrap();
    assert_eq!(manager.worker_state(id), Some(WorkerState::Busy));
    assert_eq!(manager.stats().busy, 1);

    manager.release(lease);
    assert_eq!(manager.worker_state(id), Some(WorkerState::Ready));
    assert!(manager.idle_for(id).is_some());

    let stats = manager.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.available_permits, 1);

    manager.shutdown().await;
    assert_eq!(manager.worker_state(id), None);
}

#[tokio::test]
async fn test_retired_worker_is_replaced() {
    let manager = manager(1);

    let lease = manager.acquire().await.unwrap();
    let first = lease.id().unwrap();
    manager.retire(lease, "test retirement");
    assert_eq!(manager.worker_state(first), Some(WorkerState::Terminated));

    let lease = manager.acquire().await.unwrap();
    assert_ne!(lease.id(), Some(first));
    assert_eq!(manager.stats().spawned_total, 2);
    assert_eq!(manager.stats().consecutive_crashes, 0);

    drop(lease);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_queued_and_new_callers() {
    let manager = manager(1);
    let held = manager.acquire().await.unwrap();

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.shutdown().await;
    assert!(matches!(waiter.await.unwrap(), Err(ManagerError::ShuttingDown)));
    assert!(matches!(manager.acquire().await, Err(ManagerError::ShuttingDown)));

    drop(held);
    assert_eq!(manager.stats().live, 0);
}

#[tokio::test]
async fn test_stats_serialize_for_status_output() {
    let manager = manager(3);
    let stats = serde_json::to_value(manager.stats()).unwrap();
    assert_eq!(stats["spawnedTotal"], 0);
    assert_eq!(stats["availablePermits"], 3);
    manager.shutdown().await;
}
