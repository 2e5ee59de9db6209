//! raster-sim: drive the raster scheduler over a scripted scenario.
//!
//! Loads pool settings from a TOML file (or `RASTERPOOL_*` environment
//! variables), runs the scenario's tiles through a deterministic executor and
//! upload transport, and prints what completed and in which order.

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use rasterpool_core::config::load_dotenv;
use rasterpool_core::PoolConfig;
use rasterpool_scheduler::sim::{run_scenario, Scenario};

// ── CLI ─────────────────────────────────────────────────────────────

/// Raster scheduler simulator: budgeted raster and upload over fake workers.
#[derive(Parser, Debug)]
#[command(name = "raster-sim", version, about)]
struct Cli {
    /// Pool config TOML. Falls back to environment variables when absent.
    #[arg(long, env = "RASTERPOOL_CONFIG")]
    config: Option<String>,

    /// Scenario TOML describing the tiles to raster.
    #[arg(long)]
    scenario: String,

    /// Stop after this many executor ticks even if work remains.
    #[arg(long, default_value_t = 10_000)]
    max_ticks: usize,

    /// Print the full report as JSON instead of a summary.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("loading pool config from {path}"))?,
        None => PoolConfig::from_env().context("loading pool config from environment")?,
    };
    config.log_summary();

    let scenario = Scenario::from_file(&cli.scenario)
        .with_context(|| format!("loading scenario from {}", cli.scenario))?;
    info!(
        path = %cli.scenario,
        tiles = scenario.tiles.len(),
        workers = scenario.workers,
        "loaded scenario"
    );

    let report = run_scenario(&scenario, config, cli.max_ticks);
    if !report.finished {
        warn!(ticks = report.ticks, "tick limit reached with work outstanding");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("ticks:      {}", report.ticks);
        println!("state:      {}", report.snapshot.state);
        println!("completed:  {}", report.completed.len());
        println!("failed:     {}", report.failed.len());
        println!(
            "uploads:    {} ({} bytes)",
            report.snapshot.metrics.uploads_issued, report.snapshot.metrics.bytes_uploaded
        );
        println!("throttled:  {} admission passes", report.snapshot.metrics.throttled_passes);
        let order: Vec<String> = report.upload_order.iter().map(|t| t.to_string()).collect();
        println!("upload order: {}", order.join(", "));
    }

    Ok(())
}
