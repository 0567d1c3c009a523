//! `httpload` CLI subcommands.
//!
//! Provides `run` (execute a load test) and `init` (generate starter config).

mod init;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG: &str = "loadtest.toml";

/// Load test commands.
#[derive(Debug, Subcommand)]
pub enum LoadtestCommand {
    /// Run a load test
    ///
    /// Executes the scenario defined in loadtest.toml (or a custom config
    /// path) and prints a summary. Exits non-zero when any check failed.
    Run {
        /// Path to config file
        #[arg(long, env = "HTTPLOAD_CONFIG", default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Number of virtual users (forces the constant-vus executor)
        #[arg(long)]
        vus: Option<u32>,

        /// Test duration in seconds (forces the constant-vus executor)
        #[arg(long)]
        duration: Option<u64>,

        /// RNG seed for think time (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Exit successfully even when checks failed
        #[arg(long)]
        no_fail_on_checks: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Generate a starter loadtest config file
    ///
    /// Writes a scenario that exercises /data and /health with k6-style
    /// checks and a 2-10s random think time.
    Init {
        /// Where to write the config
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,

        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

impl LoadtestCommand {
    /// Execute the selected subcommand.
    pub fn execute(self) -> Result<()> {
        match self {
            LoadtestCommand::Run {
                config,
                vus,
                duration,
                seed,
                no_fail_on_checks,
                no_color,
            } => {
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(run::execute_run(run::RunOptions {
                    config_path: config,
                    vus,
                    duration: duration.map(Duration::from_secs),
                    seed,
                    fail_on_checks: !no_fail_on_checks,
                    no_color,
                }))
            },
            LoadtestCommand::Init { path, force } => init::execute_init(&path, force),
        }
    }
}
