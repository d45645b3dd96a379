use std::{env, path::PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use parkwatch_ops::init_tracing;
use parkwatch_orchestrator::UpdateLoop;
use parkwatch_sampler::{FfmpegSource, FrameSampler};
use parkwatch_store::{AvailabilityPublisher, MemoryStore, RestGateway, StoreConnector};
use parkwatch_types::{config::ParkwatchConfig, telemetry::StopReason};
use parkwatch_vision::OccupancyEstimator;
use tokio::sync::watch;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "configs/parkwatch.toml";

/// Live camera parking availability updater.
#[derive(Debug, Parser)]
#[command(name = "parkwatch", version)]
struct Cli {
    /// Config file; falls back to $PARKWATCH_CONFIG, then configs/parkwatch.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run a single sample + estimate + publish cycle and exit.
    #[arg(long)]
    once: bool,
    /// Keep records in memory instead of writing to the store gateway.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone());
    init_tracing(&config.ops)?;

    if cli.dry_run {
        warn!("Dry run: records stay in memory");
        run(&cli, &config, MemoryStore::new()).await
    } else {
        run(&cli, &config, RestGateway::new(&config.store)).await
    }
}

async fn run<C: StoreConnector>(cli: &Cli, config: &ParkwatchConfig, connector: C) -> Result<()> {
    let sampler = FrameSampler::new(FfmpegSource::new(&config.stream), config.sampler.clone());
    let estimator = OccupancyEstimator::new(&config.site, &config.estimator);
    let publisher = AvailabilityPublisher::new(connector, &config.store);
    let mut update_loop = UpdateLoop::new(config, sampler, estimator, publisher);

    if cli.once {
        info!("Running in one-shot mode");
        let outcome = update_loop.run_once().await?;
        info!("One-shot cycle finished: {:?}", outcome);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let report = update_loop.run(shutdown_rx).await?;
    if let StopReason::Fault(reason) = report.stop {
        bail!(
            "update loop stopped after {} cycles: {}",
            report.cycles,
            reason
        );
    }
    Ok(())
}

fn load_config(from_args: Option<PathBuf>) -> ParkwatchConfig {
    let from_env = env::var("PARKWATCH_CONFIG").ok().map(PathBuf::from);
    let path = from_args
        .or(from_env)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    match ParkwatchConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                default_config()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            default_config()
        }
    }
}

fn default_config() -> ParkwatchConfig {
    let config = ParkwatchConfig::default();
    debug_assert!(config.validate().is_ok());
    config
}
