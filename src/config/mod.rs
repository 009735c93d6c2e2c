//! Configuration module for Warden.
//!
//! Handles the TOML settings file, environment overrides, and conversion into
//! runtime configuration for the manager and executor.

mod settings;

pub use settings::{
    expand_env_vars, parse_duration, BackoffSettings, ExecutorSettings, LogFormat, LoggingSettings,
    PoolSettings, Settings, SettingsError, SettingsResult, WorkerSettings, WORKER_BINARY,
};
