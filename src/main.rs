//! Counter server binary.
//!
//! Usage: `server <workers> <port> [--host H] [--config FILE] [--log-level L]`
//!
//! Prints the counter value of every reply on stdout; logs go to stderr.

use counter_reactor::config::Config;
use counter_reactor::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        read_budget = config.read_budget,
        max_payload_len = config.max_payload_len,
        "Starting counter server"
    );

    runtime::run(config)?;
    Ok(())
}
