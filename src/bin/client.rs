//! Client driver binary.
//!
//! Usage: `client <clients> <hostname> <port> <messages> <add> <sub>`
//!
//! Prints one counter value per client on stdout; diagnostics go to stderr.

use clap::Parser;
use counter_reactor::client::{self, ClientArgs};
use counter_reactor::report::Reporter;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ClientArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        clients = args.clients,
        host = %args.host,
        port = args.port,
        messages = args.messages,
        "Starting client run"
    );

    let summary = client::run(&args, Arc::new(Reporter::stdout())).await;
    info!(
        completed = summary.completed,
        failed = summary.failed,
        "Client run finished"
    );

    if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
