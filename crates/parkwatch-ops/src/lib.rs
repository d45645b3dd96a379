//! Operational helpers: tracing setup and log file handling.

use std::{
    fs::{self, File, OpenOptions},
    path::Path,
    sync::Mutex,
};

use parkwatch_types::{config::OpsConfig, ParkwatchError, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: stdout always, plus `ops.log_file` when set.
pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = build_filter(&config.log_level)?;
    let file_layer = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|err| ParkwatchError::Ops(format!("tracing init error: {err}")))?;

    if let Some(path) = &config.log_file {
        info!("Also logging to {}", path);
    }
    Ok(())
}

pub fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ParkwatchError::Ops(format!("failed to create log filter: {err}")))
}

/// Opens `path` for appending, creating missing parent directories.
pub fn open_log_file(path: impl AsRef<Path>) -> Result<File> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|err| ParkwatchError::Ops(format!("failed to create log dir: {err}")))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            ParkwatchError::Ops(format!(
                "failed to open log file {}: {err}",
                path.display()
            ))
        })
}
