//! TOML-based configuration for Warden.
//!
//! Supports a config file (warden.toml) with environment variable expansion
//! in the worker path and arguments.
//!
//! Example configuration:
//! ```toml
//! [worker]
//! path = "${WARDEN_HOME}/bin/warden-worker"
//! args = ["--desktop", "./desktop.json"]
//!
//! [executor]
//! default_timeout_secs = 30
//! max_timeout_secs = 300
//!
//! [pool]
//! size = 1
//! suspect_grace = "2s"
//! sweep_interval = "250ms"
//! shutdown_grace = "3s"
//!
//! [backoff]
//! initial = "250ms"
//! max = "10s"
//!
//! [logging]
//! filter = "info,warden=debug"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::ExecutorConfig;
use crate::manager::{BackoffPolicy, ManagerConfig};
use crate::transport::DEFAULT_MAX_FRAME_BYTES;

/// Name of the worker binary searched for when no path is configured.
pub const WORKER_BINARY: &str = "warden-worker";

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Worker process configuration.
    pub worker: WorkerSettings,

    /// Per-call defaults.
    pub executor: ExecutorSettings,

    /// Pool sizing and supervision timings.
    pub pool: PoolSettings,

    /// Restart backoff after worker crashes.
    pub backoff: BackoffSettings,

    /// Log output.
    pub logging: LoggingSettings,
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to the worker binary (supports ${ENV_VAR} expansion).
    pub path: Option<String>,

    /// Extra arguments passed to the worker (supports ${ENV_VAR} expansion).
    pub args: Vec<String>,

    /// Extra environment variables for the worker.
    pub env: BTreeMap<String, String>,

    /// Largest accepted frame in bytes.
    pub max_frame_bytes: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Per-call defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Timeout used when the caller does not supply one.
    pub default_timeout_secs: u64,

    /// Largest timeout a caller may request.
    pub max_timeout_secs: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_timeout_secs: 300,
        }
    }
}

/// Pool sizing and supervision timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of concurrently busy workers.
    pub size: usize,

    /// Spawn the full pool at startup instead of on first use.
    pub warm_on_start: bool,

    /// How long a suspect worker may stay unresponsive before it is killed.
    pub suspect_grace: String,

    /// How often the supervisor sweeps the pool.
    pub sweep_interval: String,

    /// How long shutdown waits for workers to exit before killing them.
    pub shutdown_grace: String,

    /// Deadline for the readiness probe of a freshly spawned worker.
    pub startup_timeout: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 1,
            warm_on_start: false,
            suspect_grace: "2s".to_string(),
            sweep_interval: "250ms".to_string(),
            shutdown_grace: "3s".to_string(),
            startup_timeout: "10s".to_string(),
        }
    }
}

/// Restart backoff after worker crashes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// Delay before the first respawn after a crash.
    pub initial: String,

    /// Upper bound for the delay.
    pub max: String,

    /// Add up to 20% random jitter.
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: "250ms".to_string(),
            max: "10s".to_string(),
            jitter: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive string.
    pub filter: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SettingsResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations, then apply
    /// environment overrides.
    ///
    /// Searches in order:
    /// 1. Environment variable `WARDEN_CONFIG`
    /// 2. `./warden.toml`
    /// 3. `~/.config/warden/config.toml`
    pub fn load() -> SettingsResult<Self> {
        let mut settings = Self::load_file()?;
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    fn load_file() -> SettingsResult<Self> {
        if let Ok(path) = env::var("WARDEN_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("warden.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("warden").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Apply `WARDEN_WORKER`, `WARDEN_POOL_SIZE`, `WARDEN_DEFAULT_TIMEOUT`
    /// and `WARDEN_LOG`.
    pub fn apply_env_overrides(&mut self) -> SettingsResult<()> {
        if let Ok(path) = env::var("WARDEN_WORKER") {
            self.worker.path = Some(path);
        }
        if let Ok(size) = env::var("WARDEN_POOL_SIZE") {
            self.pool.size = size.trim().parse().map_err(|_| {
                SettingsError::InvalidConfig(format!("WARDEN_POOL_SIZE is not a number: {size}"))
            })?;
        }
        if let Ok(timeout) = env::var("WARDEN_DEFAULT_TIMEOUT") {
            self.executor.default_timeout_secs = timeout.trim().parse().map_err(|_| {
                SettingsError::InvalidConfig(format!(
                    "WARDEN_DEFAULT_TIMEOUT is not a number: {timeout}"
                ))
            })?;
        }
        if let Ok(filter) = env::var("WARDEN_LOG") {
            self.logging.filter = filter;
        }
        Ok(())
    }

    /// Check invariants that would otherwise surface as runtime misbehaviour.
    pub fn validate(&self) -> SettingsResult<()> {
        self.manager_config()?;
        self.executor_config()?;
        Ok(())
    }

    /// Build the process manager configuration.
    pub fn manager_config(&self) -> SettingsResult<ManagerConfig> {
        if self.pool.size == 0 {
            return Err(SettingsError::InvalidConfig(
                "pool.size must be at least 1".to_string(),
            ));
        }
        let sweep_interval = parse_duration(&self.pool.sweep_interval)?;
        if sweep_interval.is_zero() {
            return Err(SettingsError::InvalidConfig(
                "pool.sweep_interval must be greater than zero".to_string(),
            ));
        }
        if self.worker.max_frame_bytes == 0 {
            return Err(SettingsError::InvalidConfig(
                "worker.max_frame_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(ManagerConfig {
            pool_size: self.pool.size,
            suspect_grace: parse_duration(&self.pool.suspect_grace)?,
            sweep_interval,
            shutdown_grace: parse_duration(&self.pool.shutdown_grace)?,
            startup_timeout: parse_duration(&self.pool.startup_timeout)?,
            max_frame_bytes: self.worker.max_frame_bytes,
            backoff: BackoffPolicy {
                initial: parse_duration(&self.backoff.initial)?,
                max: parse_duration(&self.backoff.max)?,
                jitter: self.backoff.jitter,
            },
        })
    }

    /// Build the executor configuration.
    pub fn executor_config(&self) -> SettingsResult<ExecutorConfig> {
        let ExecutorSettings {
            default_timeout_secs,
            max_timeout_secs,
        } = self.executor;
        if default_timeout_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "executor.default_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if default_timeout_secs > max_timeout_secs {
            return Err(SettingsError::InvalidConfig(format!(
                "executor.default_timeout_secs ({default_timeout_secs}) exceeds max_timeout_secs ({max_timeout_secs})"
            )));
        }
        Ok(ExecutorConfig {
            default_timeout: Duration::from_secs(default_timeout_secs),
            max_timeout: Duration::from_secs(max_timeout_secs),
            max_frame_bytes: self.worker.max_frame_bytes,
        })
    }

    /// Resolve the worker binary path.
    ///
    /// Uses the configured path when present, otherwise a `warden-worker`
    /// next to the running executable, otherwise the bare binary name so the
    /// OS resolves it through `PATH`.
    pub fn worker_path(&self) -> SettingsResult<PathBuf> {
        if let Some(path) = &self.worker.path {
            return Ok(PathBuf::from(expand_env_vars(path)?));
        }

        let sibling = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY)))
            .filter(|candidate| candidate.exists());

        Ok(sibling.unwrap_or_else(|| PathBuf::from(WORKER_BINARY)))
    }

    /// Worker arguments with environment variables expanded.
    pub fn worker_args(&self) -> SettingsResult<Vec<String>> {
        self.worker.args.iter().map(|arg| expand_env_vars(arg)).collect()
    }
}

/// Parse a duration such as `"250ms"`, `"2s"`, `"5m"` or `"1h"`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> SettingsResult<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| SettingsError::InvalidDuration(s.to_string()))?;

    let invalid = || SettingsError::InvalidDuration(s.to_string());
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => value.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> SettingsResult<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&ch| ch != '}').collect();
            name
        } else {
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                name.push(ch);
            }
            if name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
            name
        };

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
