//! sdrm daemon.
//!
//! Loads configuration, builds the component graph over the simulated receiver
//! and drives it Standby -> Ready -> Running. Runs until Ctrl-C or the optional
//! run duration elapses, then stops back to Standby.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use sdrm::architect::Architect;
use sdrm::config::{SdrmConfig, DEFAULT_CONFIG_PATH};
use sdrm::core::ComponentState;
use sdrm::hardware::MockAirspy;
use sdrm::store::MemoryStore;

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    /// Everything, including per-command traces
    Debug,
    /// Lifecycle transitions and batch summaries
    Info,
    /// Problems only
    Warning,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
        }
    }
}

#[derive(Parser)]
#[command(name = "sdrm")]
#[command(about = "AirspyHF+ acquisition and command daemon", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (overrides application.log_level; RUST_LOG overrides both)
    #[arg(long, value_enum)]
    log: Option<LogLevel>,

    /// System mode to announce (defaults to application.system_mode)
    #[arg(long)]
    mode: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_seconds: Option<u64>,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown(run_for: Option<Duration>) -> Result<()> {
    match run_for {
        Some(duration) => {
            tokio::select! {
                () = tokio::time::sleep(duration) => {
                    tracing::info!(?duration, "Run duration elapsed");
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    tracing::info!("Interrupted");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = SdrmConfig::load_from(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    let level = match args.log {
        Some(level) => level.directive(),
        None => config.application.log_level.as_str(),
    };
    init_tracing(level);

    tracing::info!(
        name = %config.application.name,
        config = %args.config.display(),
        components = config.enabled_components().len(),
        "Starting"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    let mode = args
        .mode
        .clone()
        .unwrap_or_else(|| config.application.system_mode.clone());
    let startup_requests = config.keymaster.startup_requests.clone();
    let driver = Arc::new(MockAirspy::new(config.simulator.clone()));
    let store = Arc::new(MemoryStore::new());
    let mut architect = Architect::new(config, store, driver);

    architect.basic_init()?;
    if !architect.wait_all_in_state(ComponentState::Standby, BOOTSTRAP_TIMEOUT) {
        bail!("Components did not reach Standby");
    }
    architect.set_system_mode(&mode)?;

    if !architect.ready() {
        architect.shutdown()?;
        bail!("Not every component reached Ready");
    }
    for request in startup_requests {
        let response = architect.issue(&request.command, request.args)?;
        tracing::info!(command = %request.command, %response, "Startup request");
    }

    if !architect.start() {
        tracing::error!("Not every component reached Running");
        architect.shutdown()?;
        bail!("Startup failed");
    }
    tracing::info!(%mode, "Running");

    let waited = runtime.block_on(wait_for_shutdown(args.run_seconds.map(Duration::from_secs)));

    architect.stop();
    architect.standby();
    architect.shutdown()?;
    for (component, fault) in architect.faults() {
        tracing::warn!(component = %component, fault = %fault, "Fault reported during run");
    }
    tracing::info!("Stopped");
    waited
}
