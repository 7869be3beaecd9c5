//! CLI Entry Point for sensor_ingest
//!
//! Loads settings, starts one producer per configured sensor plus the file writer, and
//! runs until Ctrl+C. On stop, everything already received is flushed to the output file
//! before the process exits.
//!
//! # Usage
//!
//! ```bash
//! sensor_ingest --config config/sensor_ingest.toml
//! sensor_ingest --output readings.txt --log-level debug --log-format json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sensor_ingest::config::Settings;
use sensor_ingest::orchestrator::Orchestrator;
use sensor_ingest::tracing_setup::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sensor_ingest")]
#[command(about = "Collects binary TCP sensor readings into an append-only log", long_about = None)]
struct Cli {
    /// TOML settings file (defaults and SENSOR_INGEST_* variables apply without one)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output file, overriding the configured one
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "compact")]
    log_format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::load().context("Failed to load settings")?,
    };
    if let Some(output) = cli.output {
        settings.application.output_path = output;
    }
    if let Some(level) = cli.log_level {
        settings.application.log_level = level;
    }
    settings.validate()?;

    let tracing_config = TracingConfig::from_settings(&settings)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    tracing_setup::init(&tracing_config).map_err(anyhow::Error::msg)?;

    info!(
        name = %settings.application.name,
        output = %settings.application.output_path.display(),
        sensors = settings.endpoints.len(),
        "Starting. Press Ctrl+C to stop"
    );

    let orchestrator = Orchestrator::from_settings(&settings).await?;
    let summary = orchestrator
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "Failed to listen for Ctrl+C");
                // Without a signal handler there is no way to stop cleanly later.
                std::future::pending::<()>().await;
            }
        })
        .await?;

    for (sensor, stats) in &summary.producers {
        info!(
            sensor = %sensor,
            pushed = stats.pushed,
            failures = stats.failures,
            connects = stats.connects,
            "Producer summary"
        );
    }
    info!(
        processed = summary.consumer.processed,
        write_errors = summary.consumer.write_errors,
        "Application terminated"
    );
    Ok(())
}
