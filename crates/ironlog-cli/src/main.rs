//! ironlog - a terminal client for the workout tracker API.
//!
//! Stands in for the mobile screens: sign in/up, browse the exercise
//! catalog, log completed exercises and edit the profile. All requests go
//! through the core pipeline, so expired tokens are refreshed transparently.

mod commands;

use std::io;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ironlog_core::api::ApiClient;
use ironlog_core::auth::{open_store, SessionManager};
use ironlog_core::Config;

use commands::Command;

/// Log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "ironlog.log";

/// Initialize the tracing subscriber for logging.
/// Warnings go to stderr; everything the filter allows also goes to a daily log file.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {e}\n");
            eprintln!("{}", commands::USAGE);
            std::process::exit(2);
        }
    };
    if matches!(command, Command::Help) {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let mut config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!(api = %config.api_url, "ironlog starting");

    let store = open_store(&config)?;
    let client = ApiClient::new(&config, store)?;
    let manager = SessionManager::new(client);

    // Restore the stored session before running anything
    if let Err(e) = manager.restore_session() {
        eprintln!("Warning: could not restore saved session: {e}");
    }

    commands::run(command, &manager, &mut config).await
}
