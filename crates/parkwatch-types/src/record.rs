//! The availability record persisted once per update cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text layout of the human-readable `last_updated` column.
pub const LAST_UPDATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const AVAILABLE_SPOTS_QUALIFIER: &str = "available_spots";
pub const LAST_UPDATED_QUALIFIER: &str = "last_updated";
pub const TIMESTAMP_QUALIFIER: &str = "timestamp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub location_id: String,
    pub available_spots: i32,
    pub last_updated: String,
    pub unix_timestamp: i64,
}

/// One encoded column value of a row put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Fully qualified `family:qualifier` column name.
    pub column: String,
    pub value: Vec<u8>,
}

impl AvailabilityRecord {
    pub fn new(location_id: impl Into<String>, available_spots: i32, now: DateTime<Utc>) -> Self {
        Self {
            location_id: location_id.into(),
            available_spots,
            last_updated: now.format(LAST_UPDATED_FORMAT).to_string(),
            unix_timestamp: now.timestamp(),
        }
    }

    pub fn row_key(&self) -> &[u8] {
        self.location_id.as_bytes()
    }

    /// Encodes the record into the three columns of `family`.
    ///
    /// Integers are written big-endian at fixed width (4 bytes for the count,
    /// 8 bytes for the Unix timestamp); the text timestamp is UTF-8.
    pub fn cells(&self, family: &str) -> Vec<Cell> {
        vec![
            Cell {
                column: format!("{family}:{AVAILABLE_SPOTS_QUALIFIER}"),
                value: self.available_spots.to_be_bytes().to_vec(),
            },
            Cell {
                column: format!("{family}:{LAST_UPDATED_QUALIFIER}"),
                value: self.last_updated.as_bytes().to_vec(),
            },
            Cell {
                column: format!("{family}:{TIMESTAMP_QUALIFIER}"),
                value: self.unix_timestamp.to_be_bytes().to_vec(),
            },
        ]
    }
}
