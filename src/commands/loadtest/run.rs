//! `httpload run` command implementation.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use httpload::loadtest::config::LoadTestConfig;
use httpload::loadtest::engine::LoadTestEngine;
use httpload::loadtest::summary::render_summary;

/// Flags accepted by `httpload run`.
#[derive(Debug)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub vus: Option<u32>,
    pub duration: Option<Duration>,
    pub seed: Option<u64>,
    pub fail_on_checks: bool,
    pub no_color: bool,
}

/// Execute the `run` command.
///
/// Loads config, applies CLI overrides, runs the engine with Ctrl+C wired to
/// its shutdown token, and prints the summary.
pub async fn execute_run(options: RunOptions) -> Result<()> {
    // Step 1: Load config
    if !options.config_path.exists() {
        anyhow::bail!(
            "Config file not found: {}\nUse `httpload init` to create one.",
            options.config_path.display()
        );
    }
    eprintln!("Loading config from: {}", options.config_path.display());

    let mut config = LoadTestConfig::load(&options.config_path)
        .with_context(|| format!("Failed to load config '{}'", options.config_path.display()))?;

    // Step 2: Apply CLI overrides
    config.apply_overrides(options.vus, options.duration);

    // Step 3: Build and run the engine
    let mut engine = LoadTestEngine::new(config);
    if let Some(seed) = options.seed {
        engine = engine.with_seed(seed);
    }
    eprintln!(
        "Running {}, press Ctrl+C to stop early.",
        engine.config().load_profile().describe()
    );

    let ctrl_c = tokio::spawn(handle_ctrl_c(engine.shutdown_token()));
    let result = engine.run().await.context("Load test failed");
    ctrl_c.abort();
    let result = result?;

    // Step 4: Output k6-style terminal summary
    if options.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    println!("{}", render_summary(&result, engine.config()));

    let failed = result.snapshot.checks_failed();
    if options.fail_on_checks && failed > 0 {
        anyhow::bail!("{failed} check evaluation(s) failed");
    }
    Ok(())
}

/// Ctrl+C handler with two-phase shutdown.
///
/// First Ctrl+C triggers graceful drain via the cancellation token.
/// Second Ctrl+C performs a hard abort via `std::process::exit(1)`.
async fn handle_ctrl_c(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    shutdown.cancel();

    // Second Ctrl+C: hard abort
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("\nReceived second Ctrl+C, aborting immediately.");
    std::process::exit(1);
}
