//! astro_sequencer - run an unattended imaging session from a configuration file.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Connect the setup and image every target |
//! | `check` | Validate a configuration and print the effective settings |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use astro_sequencer::config::SequencerConfig;
use astro_sequencer::session::{Session, SessionEngine};
use astro_sequencer::setup::Setup;
use astro_sequencer::storage::RawFrameWriter;
use astro_sequencer::DriverRegistry;

#[derive(Parser)]
#[command(name = "astro_sequencer")]
#[command(about = "Unattended astrophotography imaging sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an imaging session
    Run {
        /// Path to the session configuration file (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Override the configured log level (trace, debug, info, warn, error)
        #[arg(long, value_name = "LEVEL")]
        log_level: Option<String>,

        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,

        /// Write the session report as JSON to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// Validate a configuration file and print the effective configuration
    Check {
        /// Path to the session configuration file (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

fn init_tracing(level: &str, json: bool) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Check { config } => check(config),
        Commands::Run {
            config,
            log_level,
            json_logs,
            report,
        } => run(config, log_level, json_logs, report).await,
    }
}

fn check(path: PathBuf) -> Result<()> {
    let config = SequencerConfig::load_from(&path)
        .with_context(|| format!("Invalid configuration {:?}", path))?;
    println!("{}", config.to_toml_string()?);
    println!(
        "# OK: {} target(s), {} telescope(s)",
        config.targets.len(),
        config.setup.telescopes.len()
    );
    Ok(())
}

async fn run(
    path: PathBuf,
    log_level: Option<String>,
    json_logs: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let config = SequencerConfig::load_from(&path)
        .with_context(|| format!("Invalid configuration {:?}", path))?;
    init_tracing(
        log_level.as_deref().unwrap_or(&config.application.log_level),
        json_logs,
    );
    tracing::info!(name = %config.application.name, config = ?path, "Loaded configuration");

    let registry = DriverRegistry::with_simulators();
    let setup = Setup::from_config(&config.setup, &registry)?;
    let session = Session::new(setup, config.targets.clone())?;
    let mut engine = SessionEngine::new(
        session,
        config.engine_options(),
        Arc::new(RawFrameWriter::new()),
    );

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, cancelling session");
            cancel.cancel();
        }
    });

    let outcome = engine.run().await;

    let mut setup = engine.into_session().into_setup();
    if let Err(err) = setup.dispose().await {
        tracing::error!(error = %err, "Equipment teardown incomplete");
    }

    let report = outcome?;
    let json = serde_json::to_string_pretty(&report)?;
    match report_path {
        Some(report_path) => {
            std::fs::write(&report_path, &json)
                .with_context(|| format!("Failed to write report to {:?}", report_path))?;
            tracing::info!(path = ?report_path, "Report written");
        }
        None => println!("{json}"),
    }

    if report.aborted_at.is_some() {
        anyhow::bail!("Session aborted: {:?}", report.abort_reason);
    }
    Ok(())
}
