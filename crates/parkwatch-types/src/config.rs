use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{ParkwatchError, Result};

pub const DEFAULT_STREAM_URL: &str =
    "https://2-fss-2.streamhoster.com/pl_126/200612-1195858-1/playlist.m3u8";
pub const DEFAULT_TABLE: &str = "maurottito_parking_availability";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    pub ffmpeg_path: Option<String>,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub table: String,
    pub column_family: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub location_id: String,
    pub total_spots: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub update_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Fixed seed for the estimate perturbation; entropy-seeded when absent.
    pub perturbation_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParkwatchConfig {
    pub stream: StreamConfig,
    pub store: StoreConfig,
    pub site: SiteConfig,
    pub sampler: SamplerConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    pub ops: OpsConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.into(),
            ffmpeg_path: None,
            read_timeout_secs: 20,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8080,
            table: DEFAULT_TABLE.into(),
            column_family: "stat".into(),
            timeout_ms: 30_000,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            location_id: "1".into(),
            total_spots: 12,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 60,
        }
    }
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
        }
    }
}

impl StreamConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl SamplerConfig {
    /// Base delay; attempt `n` waits `n` times this before the next try.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl ScheduleConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl ParkwatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            ParkwatchError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            ParkwatchError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.url.trim().is_empty() {
            return Err(ParkwatchError::Configuration(
                "stream.url must not be empty".into(),
            ));
        }
        if self.store.host.trim().is_empty() {
            return Err(ParkwatchError::Configuration(
                "store.host must not be empty".into(),
            ));
        }
        if self.store.port == 0 {
            return Err(ParkwatchError::Configuration(
                "store.port must be a valid port (>0)".into(),
            ));
        }
        if self.site.location_id.is_empty() {
            return Err(ParkwatchError::Configuration(
                "site.location_id must not be empty".into(),
            ));
        }
        if self.site.total_spots == 0 || self.site.total_spots > i32::MAX as u32 {
            return Err(ParkwatchError::Configuration(
                "site.total_spots must be between 1 and i32::MAX".into(),
            ));
        }
        if self.sampler.max_retries == 0 {
            return Err(ParkwatchError::Configuration(
                "sampler.max_retries must be greater than zero".into(),
            ));
        }
        if self.schedule.update_interval_secs == 0 {
            return Err(ParkwatchError::Configuration(
                "schedule.update_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
