use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod ml;
mod training;
mod web;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::ml::{MLEngine, PredictionContext};
use crate::training::Dataset;
use crate::web::PredictionServer;

#[derive(Parser)]
#[command(name = "flare-peak")]
#[command(about = "Solar flare peak-time prediction service and artifact tooling")]
struct Cli {
    /// TOML configuration file; defaults apply when the default file is absent
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve predictions over HTTP
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Fit input/output scaling statistics from the flare dataset
    FitScalers {
        #[arg(long)]
        dataset: Option<String>,
        /// Also write the scaled design matrix for an external training run
        #[arg(long)]
        export_matrix: Option<String>,
    },
    /// Score the deployed artifacts on a seeded holdout of the dataset
    Evaluate {
        #[arg(long)]
        dataset: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path, true)?,
        None => Config::load(DEFAULT_CONFIG_PATH, false)?,
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::FitScalers {
            dataset,
            export_matrix,
        } => fit_scalers(&config, dataset, export_matrix),
        Command::Evaluate { dataset } => evaluate(&config, dataset),
    }
}

async fn serve(config: Config, port: Option<u16>) -> Result<()> {
    info!("Starting flare peak prediction service");

    let ml_engine = Arc::new(MLEngine::from_config(&config.artifacts));

    let mut server = PredictionServer::new(ml_engine, &config.server.plots_dir);
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!("Metrics recorder unavailable: {}", e),
    }

    let port = port.unwrap_or(config.server.port);
    server
        .start(&config.server.host, port, async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
        })
        .await
}

fn fit_scalers(config: &Config, dataset: Option<String>, export_matrix: Option<String>) -> Result<()> {
    let dataset_path = dataset.unwrap_or_else(|| config.fitting.dataset_path.clone());
    let dataset = Dataset::load(&dataset_path)?;
    let report = &dataset.report;
    info!(
        "Data after cleaning: {} rows (dropped {} unparsable, {} with negative peak offsets)",
        report.kept, report.unparsable, report.negative_offset
    );

    let scalers = training::fit_scalers(&dataset.samples)?;
    scalers.input.save(&config.artifacts.scaler_x_path)?;
    scalers.output.save(&config.artifacts.scaler_y_path)?;
    info!(
        "Scalers saved to '{}' and '{}'",
        config.artifacts.scaler_x_path, config.artifacts.scaler_y_path
    );

    if let Some(path) = export_matrix {
        let rows = training::export_scaled_matrix(&path, &dataset.samples, &scalers)?;
        info!("Wrote {} scaled rows to '{}'", rows, path);
    }
    Ok(())
}

fn evaluate(config: &Config, dataset: Option<String>) -> Result<()> {
    let dataset_path = dataset.unwrap_or_else(|| config.fitting.dataset_path.clone());
    let context = PredictionContext::load(&config.artifacts).context("loading artifacts")?;
    let dataset = Dataset::load(&dataset_path)?;

    let (_, holdout) = training::split_holdout(
        &dataset.samples,
        config.fitting.test_fraction,
        config.fitting.seed,
    );
    let report = training::evaluate(&context, &holdout);
    info!(
        model_version = context.model_version(),
        samples = report.samples,
        failures = report.failures,
        "Test MAE: {:.2} seconds, RMSE: {:.2} seconds",
        report.mae_seconds,
        report.rmse_seconds
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
