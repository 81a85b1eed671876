//! hello-timeout: a fixed-response TCP fixture for benchmarking runtimes
//!
//! Every accepted connection is served by its own task that repeatedly
//! reads a request and answers with the same HTTP-like response.
//!
//! Features:
//! - Independent 5 second deadlines on every read and every write
//! - Worker thread count set once at startup
//! - Optional TOML file for listener and connection tuning

use hello_timeout::config::Config;
use hello_timeout::runtime;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration. Logging is not up yet, so report on stderr.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        max_connections = ?config.max_connections,
        "Starting hello-timeout server"
    );

    match runtime::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server terminated");
            ExitCode::FAILURE
        }
    }
}
