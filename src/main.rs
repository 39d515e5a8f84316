//! CLI entry point for the skyglow fusion pipeline.
//!
//! Provides subcommands for submitting device readings, ingesting the two
//! external feeds, running the fusion/correlation analysis, and driving the
//! whole pipeline on a fixed interval.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use skyglow_fuser::{
    aggregate::{aggregate_reading, record_reading},
    analysis::run_analysis,
    config::SkyglowConfig,
    fetch::BasicClient,
    ingest,
    reading::Reading,
    store::MemoryStore,
};

#[derive(Parser)]
#[command(name = "skyglow_fuser")]
#[command(about = "Light pollution / cloud cover fusion pipeline", long_about = None)]
struct Cli {
    /// JSON snapshot file backing the document store
    #[arg(long, default_value = "skyglow_store.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit device readings from a JSON file (one object or an array)
    Submit {
        /// Path to the readings file
        #[arg(value_name = "FILE")]
        input: String,
    },
    /// Fetch the sky-brightness feed and store new records
    IngestSky,
    /// Fetch the cloud-cover forecast and store the current-hour observation
    IngestCloud,
    /// Fuse the three datasets and store the correlation analysis
    Analyze,
    /// Run ingest + analysis on a fixed interval
    Run {
        /// Number of ticks to run (0 = until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        ticks: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/skyglow_fuser.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("skyglow_fuser.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = SkyglowConfig::from_env();
    let store = MemoryStore::load_or_default(&cli.store)?;

    match cli.command {
        Commands::Submit { input } => {
            let readings = load_readings(&input)?;
            info!(count = readings.len(), %input, "Submitting readings");
            for reading in &readings {
                let id = record_reading(&store, reading).await?;
                info!(%id, "Raw reading stored");
                aggregate_reading(&store, reading).await?;
            }
        }
        Commands::IngestSky => {
            let client = BasicClient::new()?;
            let stored = ingest::sky::ingest(&client, &store, &config).await?;
            info!(stored, "Sky feed run finished");
        }
        Commands::IngestCloud => {
            let client = BasicClient::new()?;
            let stored = ingest::cloud::ingest(&client, &store, &config).await?;
            info!(stored, "Cloud feed run finished");
        }
        Commands::Analyze => {
            let result = run_analysis(&store).await?;
            info!(
                time_points = result.times.len(),
                correlation_aggregated = ?result.correlation_aggregated,
                correlation_open = ?result.correlation_open,
                "Analysis run finished"
            );
        }
        Commands::Run { ticks } => {
            run_pipeline(&store, &config, &cli.store, ticks).await?;
        }
    }

    store.save(&cli.store).await?;
    Ok(())
}

/// Loads readings from a JSON file holding either one object or an array.
fn load_readings(path: &str) -> Result<Vec<Reading>> {
    let content = std::fs::read_to_string(path)?;
    let readings = match serde_json::from_str::<Value>(&content)? {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Reading>, _>>()?,
        single => vec![serde_json::from_value(single)?],
    };
    Ok(readings)
}

/// Drives ingest → analysis on a fixed interval, mirroring the hourly
/// schedule of the deployed pipeline. Stage failures are logged and the
/// next tick self-heals; the loop itself only stops when told to.
#[tracing::instrument(skip(store, config, snapshot_path))]
async fn run_pipeline(
    store: &MemoryStore,
    config: &SkyglowConfig,
    snapshot_path: &Path,
    ticks: usize,
) -> Result<()> {
    let client = BasicClient::new()?;

    if ticks == 0 {
        info!(
            interval_secs = config.run_interval_secs,
            "Running until interrupted. Press Ctrl+C to stop."
        );
    } else {
        info!(ticks, interval_secs = config.run_interval_secs, "Starting pipeline run");
    }

    let mut tick = 0usize;
    loop {
        if ticks > 0 && tick >= ticks {
            break;
        }
        tick += 1;

        info!(tick, "Starting pipeline tick");

        match ingest::sky::ingest(&client, store, config).await {
            Ok(stored) => info!(stored, "Sky feed ingested"),
            Err(e) => error!(error = %e, "Sky feed ingestion failed"),
        }

        match ingest::cloud::ingest(&client, store, config).await {
            Ok(stored) => info!(stored, "Cloud feed ingested"),
            Err(e) => error!(error = %e, "Cloud feed ingestion failed"),
        }

        match run_analysis(store).await {
            Ok(result) => info!(time_points = result.times.len(), "Analysis updated"),
            Err(e) => error!(error = %e, "Analysis failed"),
        }

        if let Err(e) = store.save(snapshot_path).await {
            error!(error = %e, "Store snapshot save failed");
        }

        if ticks == 0 || tick < ticks {
            info!(
                interval_secs = config.run_interval_secs,
                "Waiting before next tick"
            );
            tokio::time::sleep(tokio::time::Duration::from_secs(config.run_interval_secs)).await;
        }
    }

    info!("Pipeline run finished");
    Ok(())
}
