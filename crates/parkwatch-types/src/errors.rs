use thiserror::Error;

pub type Result<T, E = ParkwatchError> = std::result::Result<T, E>;

/// Unified error type covering failure scenarios across the pipeline stages.
#[derive(Debug, Error)]
pub enum ParkwatchError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("vision error: {0}")]
    Vision(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
