//! Warden CLI - Run accessibility operations through isolated workers
//!
//! Usage:
//!   warden exec <OPERATION> [-p key=value]... [--timeout <secs>]
//!   warden ping [--timeout <secs>]
//!   warden operations
//!   warden config
//!
//! Examples:
//!   warden exec Invoke -p elementId=btn1
//!   warden exec SetRangeValue -p elementId=slider1 -p value=75 --timeout 5
//!   warden --config ./warden.toml ping

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use warden::config::Settings;
use warden::executor::OperationExecutor;
use warden::manager::{CommandSpawner, ProcessManager};
use warden::protocol::{Operation, OperationResult, Parameters};
use warden::telemetry;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - Run accessibility operations in supervised worker processes")]
#[command(version)]
struct Cli {
    /// Path to a warden.toml (defaults to the usual search locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one operation and print its result as JSON
    Exec {
        /// Operation name, e.g. Invoke or GetValue
        operation: String,

        /// Parameter as key=value; values that parse as JSON are sent as JSON
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Deadline in seconds (defaults to executor.default_timeout_secs)
        #[arg(short, long)]
        timeout: Option<i64>,
    },

    /// Round-trip a health probe through a worker
    Ping {
        /// Deadline in seconds
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },

    /// List supported operations and the pattern each requires
    Operations,

    /// Print the effective configuration as TOML
    Config,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(settings) => settings,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Operations => cmd_operations(),
        Commands::Config => cmd_config(&settings),
        Commands::Exec {
            operation,
            params,
            timeout,
        } => run_async(settings, |executor| async move {
            let parameters: Parameters = params.into_iter().collect();
            match timeout {
                Some(seconds) => executor.execute(&operation, parameters, seconds).await,
                None => executor.execute_default(&operation, parameters).await,
            }
        }),
        Commands::Ping { timeout } => run_async(settings, |executor| async move {
            executor.ping(Duration::from_secs(timeout)).await
        }),
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, String> {
    let mut settings = match path {
        Some(path) => Settings::from_file(path).map_err(|e| format!("Error loading config: {e}"))?,
        None => Settings::load().map_err(|e| format!("Error loading config: {e}"))?,
    };
    if path.is_some() {
        settings
            .apply_env_overrides()
            .map_err(|e| format!("Error loading config: {e}"))?;
    }
    settings
        .validate()
        .map_err(|e| format!("Invalid config: {e}"))?;
    Ok(settings)
}

fn cmd_operations() -> ExitCode {
    println!("Operations:");
    for operation in Operation::ALL {
        match operation.required_pattern() {
            Some(pattern) => println!("  - {} (requires {})", operation.as_str(), pattern.as_str()),
            None => println!("  - {}", operation.as_str()),
        }
    }
    ExitCode::SUCCESS
}

fn cmd_config(settings: &Settings) -> ExitCode {
    match toml::to_string_pretty(settings) {
        Ok(rendered) => {
            print!("{rendered}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error rendering config: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Start the pool, run one call, print the result and shut down.
fn run_async<F, Fut>(settings: Settings, call: F) -> ExitCode
where
    F: FnOnce(Arc<OperationExecutor>) -> Fut,
    Fut: std::future::Future<Output = OperationResult>,
{
    if let Err(e) = telemetry::initialise(&settings.logging) {
        eprintln!("Error initialising logging: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let executor = match build_executor(&settings) {
            Ok(executor) => Arc::new(executor),
            Err(message) => {
                eprintln!("{message}");
                return ExitCode::FAILURE;
            }
        };

        if settings.pool.warm_on_start {
            if let Err(e) = executor.manager().warm_up().await {
                eprintln!("Error warming worker pool: {e}");
                executor.shutdown().await;
                return ExitCode::FAILURE;
            }
        }

        let result = call(executor.clone()).await;
        executor.shutdown().await;

        match serde_json::to_string_pretty(&result) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("Error rendering result: {e}");
                return ExitCode::FAILURE;
            }
        }

        if result.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    })
}

fn build_executor(settings: &Settings) -> Result<OperationExecutor, String> {
    let program = settings
        .worker_path()
        .map_err(|e| format!("Error resolving worker: {e}"))?;
    let args = settings
        .worker_args()
        .map_err(|e| format!("Error resolving worker arguments: {e}"))?;
    // Workers log with the controller's filter unless worker.env says otherwise.
    let spawner = CommandSpawner::new(program)
        .args(args)
        .envs([("WARDEN_LOG", settings.logging.filter.clone())])
        .envs(settings.worker.env.clone());

    let manager_config = settings
        .manager_config()
        .map_err(|e| format!("Invalid config: {e}"))?;
    let executor_config = settings
        .executor_config()
        .map_err(|e| format!("Invalid config: {e}"))?;

    let manager = ProcessManager::start(manager_config, Arc::new(spawner))
        .map_err(|e| format!("Error starting worker pool: {e}"))?;
    Ok(OperationExecutor::new(manager, executor_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_param_prefers_json() {
        assert_eq!(parse_param("value=75").unwrap(), ("value".to_string(), json!(75)));
        assert_eq!(parse_param("flag=true").unwrap(), ("flag".to_string(), json!(true)));
        assert_eq!(
            parse_param("elementId=btn1").unwrap(),
            ("elementId".to_string(), json!("btn1"))
        );
        assert_eq!(parse_param("value=a=b").unwrap(), ("value".to_string(), json!("a=b")));
    }

    #[test]
    fn test_parse_param_rejects_malformed() {
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=5").is_err());
    }

    #[test]
    fn test_cli_parses_exec() {
        let cli = Cli::try_parse_from(["warden", "exec", "Invoke", "-p", "elementId=btn1", "-t", "5"]).unwrap();
        match cli.command {
            Commands::Exec {
                operation,
                params,
                timeout,
            } => {
                assert_eq!(operation, "Invoke");
                assert_eq!(params, vec![("elementId".to_string(), json!("btn1"))]);
                assert_eq!(timeout, Some(5));
            }
            _ => panic!("expected exec"),
        }
    }
}
