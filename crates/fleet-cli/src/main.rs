//! Fleet CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use fleet_cli::cli::Cli;
use fleet_cli::commands;

#[tokio::main]
async fn main() {
    fleet_core::load_env();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = commands::execute(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
