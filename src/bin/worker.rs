//! Warden worker - serves accessibility operations over stdin/stdout
//!
//! Spawned by the controller; not meant to be run by hand except for
//! debugging. Reads one JSON frame per line from stdin and writes one result
//! per request to stdout. Logs go to stderr.
//!
//! Usage:
//!   warden-worker [--desktop <fixture.json>]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use warden::config::{LoggingSettings, Settings};
use warden::telemetry;
use warden::worker::{ScriptedDesktop, WorkerLoop};

#[derive(Parser)]
#[command(name = "warden-worker")]
#[command(about = "Warden worker process - serves operations over stdio")]
#[command(version)]
struct Cli {
    /// JSON desktop fixture to serve (defaults to the built-in demo desktop)
    #[arg(short, long)]
    desktop: Option<PathBuf>,

    /// Largest accepted frame in bytes
    #[arg(long)]
    max_frame_bytes: Option<usize>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = Settings::load().ok();
    let logging = settings
        .as_ref()
        .map(|s| s.logging.clone())
        .unwrap_or_else(LoggingSettings::default);
    if let Err(e) = telemetry::initialise(&logging) {
        eprintln!("Error initialising logging: {e}");
        return ExitCode::FAILURE;
    }

    let desktop = match &cli.desktop {
        Some(path) => match ScriptedDesktop::from_path(path) {
            Ok(desktop) => desktop,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "cannot load desktop");
                return ExitCode::FAILURE;
            }
        },
        None => ScriptedDesktop::demo(),
    };

    let max_frame_bytes = cli
        .max_frame_bytes
        .or_else(|| settings.as_ref().map(|s| s.worker.max_frame_bytes))
        .unwrap_or(warden::transport::DEFAULT_MAX_FRAME_BYTES);

    let worker = WorkerLoop::new(Arc::new(desktop)).with_max_frame_bytes(max_frame_bytes);
    match worker.run(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(reason) => {
            tracing::info!(?reason, "worker exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "worker stream failed");
            ExitCode::FAILURE
        }
    }
}
