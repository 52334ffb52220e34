//! Binary crate for the `weather-relay` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments and environment configuration
//! - Interactive configuration
//! - Logging setup and signal handling

use clap::Parser;

mod cli;
mod signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let cmd = cli::Cli::parse();
    cmd.run().await
}
