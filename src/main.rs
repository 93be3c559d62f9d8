//! shop-bench - load generation and outcome verification for commerce backends

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    tracing::debug!("shop-bench starting");

    match cli.run().await {
        Ok(code) => code,
        Err(e) => cli::fatal(&e),
    }
}
