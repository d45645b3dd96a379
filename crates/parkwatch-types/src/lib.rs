//! Shared domain types for the parking availability updater.

pub mod config;
pub mod record;
pub mod telemetry;
pub mod vision;

mod errors;

pub use errors::{ParkwatchError, Result};
