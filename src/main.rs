//! httpload: virtual-user HTTP load generator.
//!
//! Runs TOML-described scenarios with a constant or staged number of virtual
//! users and prints a k6-style summary of request latency and check results.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::loadtest::LoadtestCommand;

/// Virtual-user HTTP load generator
#[derive(Parser)]
#[command(name = "httpload")]
#[command(about = "Load test HTTP services with virtual users and checks", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: LoadtestCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    cli.command.execute()
}

/// Log to stderr so the summary on stdout stays clean.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("httpload={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
