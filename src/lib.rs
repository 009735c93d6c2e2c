//! # Warden
//!
//! Runs desktop accessibility calls in supervised worker processes so that a
//! native call which hangs, faults or kills its process costs the caller one
//! failed operation instead of the whole host.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   OperationExecutor                     │
//! │      (validation, deadline, outcome classification)     │
//! └─────────────────────────────────────────────────────────┘
//!                          │ acquire / release / mark_suspect
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    ProcessManager                       │
//! │  (pool, FIFO capacity, suspect sweep, crash backoff)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │ WorkerChannel (NDJSON over stdio)
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                 warden-worker process                   │
//! │          WorkerLoop ──▶ NativeCapability                │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use warden::config::Settings;
//! use warden::executor::OperationExecutor;
//! use warden::manager::{CommandSpawner, ProcessManager};
//! use warden::protocol::operations::InvokeParams;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! let spawner = CommandSpawner::new(settings.worker_path()?);
//! let manager = ProcessManager::start(settings.manager_config()?, Arc::new(spawner))?;
//! let executor = OperationExecutor::new(manager, settings.executor_config()?);
//!
//! let result = executor
//!     .execute_typed(&InvokeParams::new("btn1"), std::time::Duration::from_secs(5))
//!     .await;
//! println!("{}", serde_json::to_string(&result)?);
//! executor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod executor;
pub mod manager;
pub mod protocol;
pub mod telemetry;
pub mod transport;
pub mod worker;
