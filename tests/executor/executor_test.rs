//! End-to-end executor tests against in-process workers serving the demo
//! desktop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use warden::executor::{ExecutorConfig, OperationExecutor};
use warden::manager::{ManagerConfig, ProcessManager};
use warden::protocol::operations::{GetTextParams, SetValueParams};
use warden::protocol::{ErrorCategory, Parameters};
use warden::worker::{InProcessSpawner, ScriptedDesktop};

fn executor_with(desktop: ScriptedDesktop, pool_size: usize) -> OperationExecutor {
    let config = ManagerConfig {
        pool_size,
        ..ManagerConfig::default()
    };
    let spawner = InProcessSpawner::new(Arc::new(desktop), config.max_frame_bytes);
    let manager = ProcessManager::start(config, Arc::new(spawner)).unwrap();
    OperationExecutor::new(manager, ExecutorConfig::default())
}

fn params(value: serde_json::Value) -> Parameters {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_invoke_returns_worker_result_verbatim() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);

    let result = executor
        .execute("Invoke", params(json!({"elementId": "btn1"})), 5)
        .await;

    assert!(result.success, "unexpected failure: {result:?}");
    assert_eq!(result.data, Some(json!("Element invoked successfully")));
    assert!(result.error_message.is_none());
    assert_eq!(result.category(), ErrorCategory::None);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_capability_fault_keeps_worker() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);

    let result = executor
        .execute("GetValue", params(json!({"elementId": "nonexistent"})), 5)
        .await;
    assert!(!result.success);
    assert_eq!(result.category(), ErrorCategory::ElementNotFound);

    let result = executor
        .execute("Toggle", params(json!({"elementId": "btn1"})), 5)
        .await;
    assert_eq!(result.category(), ErrorCategory::PatternNotSupported);

    let result = executor
        .execute("Invoke", params(json!({"elementId": "btn1"})), 5)
        .await;
    assert!(result.success);

    // Faults the worker reports are ordinary answers; nothing was replaced.
    assert_eq!(executor.manager().stats().spawned_total, 1);
    executor.shutdown().await;
}

#[tokio::test]
async fn test_state_persists_across_calls() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);
    let timeout = Duration::from_secs(5);

    let set = executor
        .execute_typed(&SetValueParams::new("txt1", "Ada Lovelace"), timeout)
        .await;
    assert_eq!(set.data, Some(json!("Value set successfully")));

    let get = executor
        .execute("GetValue", params(json!({"elementId": "txt1"})), 5)
        .await;
    assert_eq!(get.data, Some(json!("Ada Lovelace")));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_numeric_values_are_accepted_as_text() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);

    let set = executor
        .execute("SetValue", params(json!({"elementId": "txt1", "value": 42})), 5)
        .await;
    assert!(set.success, "numeric value rejected: {set:?}");

    let get = executor
        .execute("GetValue", params(json!({"elementId": "txt1"})), 5)
        .await;
    assert_eq!(get.data, Some(json!("42")));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_oversized_request_fails_validation_and_spares_the_worker() {
    let manager_config = ManagerConfig {
        max_frame_bytes: 256,
        ..ManagerConfig::default()
    };
    let spawner = InProcessSpawner::new(Arc::new(ScriptedDesktop::demo()), manager_config.max_frame_bytes);
    let manager = ProcessManager::start(manager_config, Arc::new(spawner)).unwrap();
    let executor = OperationExecutor::new(
        manager,
        ExecutorConfig {
            max_frame_bytes: 256,
            ..ExecutorConfig::default()
        },
    );

    let started = std::time::Instant::now();
    let result = executor
        .execute(
            "SetValue",
            params(json!({"elementId": "txt1", "value": "x".repeat(1000)})),
            2,
        )
        .await;
    assert_eq!(result.category(), ErrorCategory::Validation);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(executor.manager().stats().spawned_total, 0);

    let result = executor
        .execute("SetValue", params(json!({"elementId": "txt1", "value": "short"})), 2)
        .await;
    assert!(result.success, "small request failed: {result:?}");
    let stats = executor.manager().stats();
    assert_eq!(stats.spawned_total, 1);
    assert_eq!(stats.live, 1);

    executor.shutdown().await;
}

#[tokio::test]
async fn test_local_validation_never_reaches_a_worker() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);

    let result = executor
        .execute("Invoke", params(json!({"elementId": "btn1"})), 0)
        .await;
    assert_eq!(result.category(), ErrorCategory::Validation);

    let result = executor
        .execute("Invoke", params(json!({"elementId": "btn1"})), -3)
        .await;
    assert_eq!(result.category(), ErrorCategory::Validation);

    let result = executor.execute("", Parameters::new(), 5).await;
    assert_eq!(result.category(), ErrorCategory::Validation);

    assert_eq!(executor.manager().stats().spawned_total, 0);
    executor.shutdown().await;
}

#[tokio::test]
async fn test_unknown_operation_is_rejected_by_worker() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);

    let result = executor.execute("Teleport", Parameters::new(), 5).await;
    assert!(!result.success);
    assert_eq!(result.category(), ErrorCategory::Validation);
    assert!(result.error_message.unwrap().contains("Teleport"));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_calls_get_their_own_results() {
    let desktop = ScriptedDesktop::from_json(
        r#"{"elements":[
            {"id":"a","name":"Alpha","patterns":["Text"],"delayMs":60},
            {"id":"b","name":"Bravo","patterns":["Text"],"delayMs":20},
            {"id":"c","name":"Charlie","patterns":["Text"],"delayMs":40},
            {"id":"d","name":"Delta","patterns":["Text"]},
            {"id":"e","name":"Echo","patterns":["Text"],"delayMs":10},
            {"id":"f","name":"Foxtrot","patterns":["Text"],"delayMs":30}
        ]}"#,
    )
    .unwrap();
    let executor = Arc::new(executor_with(desktop, 3));

    let calls = [
        ("a", "Alpha"),
        ("b", "Bravo"),
        ("c", "Charlie"),
        ("d", "Delta"),
        ("e", "Echo"),
        ("f", "Foxtrot"),
    ]
    .into_iter()
    .map(|(id, name)| {
        let executor = executor.clone();
        async move {
            let result = executor
                .execute_typed(&GetTextParams::new(id), Duration::from_secs(5))
                .await;
            (name, result)
        }
    });

    for (name, result) in futures::future::join_all(calls).await {
        assert!(result.success, "{name}: {result:?}");
        assert_eq!(result.data, Some(json!(name)));
    }

    let stats = executor.manager().stats();
    assert!(stats.spawned_total <= 3, "pool grew past its size: {stats:?}");
    executor.shutdown().await;
}

#[tokio::test]
async fn test_ping_round_trips() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);
    let result = executor.ping(Duration::from_secs(5)).await;
    assert!(result.success);
    assert_eq!(result.data, Some(json!("pong")));
    executor.shutdown().await;
}

#[tokio::test]
async fn test_calls_after_shutdown_fail_cleanly() {
    let executor = executor_with(ScriptedDesktop::demo(), 1);
    executor.shutdown().await;

    let result = executor
        .execute("Invoke", params(json!({"elementId": "btn1"})), 5)
        .await;
    assert!(!result.success);
    assert_eq!(result.category(), ErrorCategory::WorkerFault);
}
