//! CLI entry point for daq-actions
//!
//! Provides command-line interface for:
//! - Running the configured trigger/action processors against a data store
//! - Appending data points to a store by hand
//! - Checking a configuration file
//!
//! # Usage
//!
//! Run processors until interrupted (Ctrl+C twice):
//! ```bash
//! daq-actions run config/actions.toml --db data/datapoints.jsonl
//! ```
//!
//! Insert a reading:
//! ```bash
//! daq-actions insert --db data/datapoints.jsonl --sensor Temperature \
//!     --deployment 2b7bca56-92a3-4e27-b2e3-1d2f1c0f1a01 17.5
//! ```
//!
//! Send SIGUSR1 to a running process to print per-processor statistics.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use daq_actions::config::ActionsConfig;
use daq_actions::core::{DataPoint, DataStore};
use daq_actions::logging::{self, LoggingConfig};
use daq_actions::pipeline::signals::REARM_PROMPT;
use daq_actions::pipeline::{ActionRunner, OngoingSource, RunContext};
use daq_actions::registry::ProcessorRegistry;
use daq_actions::store::JsonlStore;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "daq-actions")]
#[command(about = "Run trigger/action pipelines over incoming sensor data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured processors until interrupted
    Run {
        /// Path to the actions configuration file
        config: PathBuf,

        /// Data point store (JSON lines)
        #[arg(long, env = "DAQ_ACTIONS_DB", default_value = "data/datapoints.jsonl")]
        db: PathBuf,

        /// Process data already in the store as well as new data
        #[arg(long)]
        historical: bool,

        /// Log at debug level, overriding `application.log_level`
        #[arg(short, long)]
        verbose: bool,
    },

    /// Append one data point to the store
    Insert {
        #[arg(long, env = "DAQ_ACTIONS_DB", default_value = "data/datapoints.jsonl")]
        db: PathBuf,

        #[arg(long)]
        sensor: String,

        #[arg(long)]
        deployment: Uuid,

        /// Measurement payload as JSON, e.g. `17.5` or `{"magnitude": 17.5, "unit": "degC"}`
        data: String,
    },

    /// Load and validate a configuration file
    Check {
        config: PathBuf,

        /// Print the effective configuration, environment overrides applied
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            db,
            historical,
            verbose,
        } => run_actions(config, db, historical, verbose).await,
        Commands::Insert {
            db,
            sensor,
            deployment,
            data,
        } => insert_point(db, sensor, deployment, data).await,
        Commands::Check { config, print } => check_config(config, print),
    }
}

async fn run_actions(
    config_path: PathBuf,
    db: PathBuf,
    historical: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = ActionsConfig::load_from(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;
    config.validate()?;
    if historical {
        config.source.historical = true;
    }

    logging::init(LoggingConfig::from_config(&config)?.verbose(verbose))?;

    let store = Arc::new(
        JsonlStore::open(&db)
            .await
            .with_context(|| format!("Could not open store {}", db.display()))?,
    );
    let (context, feedback) = RunContext::new(store);

    let registry = ProcessorRegistry::new(context.clone(), config.processing.to_options());
    let processors = registry.create_all(&config)?;
    if processors.is_empty() {
        anyhow::bail!("{} defines no processors", config_path.display());
    }

    println!(
        "Running {} processors against {}",
        processors.len(),
        db.display()
    );
    println!("{}", REARM_PROMPT);

    let source = OngoingSource::open(&context, feedback, config.source.to_options()).await?;
    let mut runner = ActionRunner::new(processors);
    let handles = runner.stats_handles();
    let outcome = runner.run(source).await;

    for handle in &handles {
        println!("{} {}", handle.name(), handle.stats());
    }
    outcome?;

    println!("Stopped");
    Ok(())
}

async fn insert_point(db: PathBuf, sensor: String, deployment: Uuid, data: String) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(&data).context("Data must be valid JSON")?;

    let store = JsonlStore::open(&db).await?;
    let point = DataPoint::new(sensor, Some(data), deployment, Utc::now());
    let id = store.insert(&point).await?;
    store.commit().await?;

    println!("Inserted data point {} into {}", id, db.display());
    Ok(())
}

fn check_config(config_path: PathBuf, print: bool) -> Result<()> {
    let config = ActionsConfig::load_from(&config_path)?;
    config.validate()?;

    if print {
        println!("{}", config.to_toml_string()?);
    }

    println!("{} is valid", config_path.display());
    for processor in &config.processors {
        println!("  {}: {}", processor.name, processor.action.describe());
    }
    Ok(())
}
