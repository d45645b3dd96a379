//! Availability persistence: store connection abstraction and the per-cycle publisher.

mod rest;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use parkwatch_types::{
    config::StoreConfig,
    record::{AvailabilityRecord, Cell},
    ParkwatchError, Result,
};
use tokio::sync::Mutex;
use tracing::{error, info};

pub use rest::{CellSet, RestGateway};

/// Opens connections to a wide-column store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>>;
    fn describe(&self) -> String;
}

/// A live store connection. Callers must hand it back through `close`.
#[async_trait]
pub trait StoreConnection: Send {
    async fn put(&mut self, table: &str, row_key: &[u8], cells: &[Cell]) -> Result<()>;
    async fn close(self: Box<Self>);
}

/// Writes one availability record per call over a connection of its own.
pub struct AvailabilityPublisher<C: StoreConnector> {
    connector: C,
    table: String,
    column_family: String,
}

impl<C: StoreConnector> AvailabilityPublisher<C> {
    pub fn new(connector: C, config: &StoreConfig) -> Self {
        Self {
            connector,
            table: config.table.clone(),
            column_family: config.column_family.clone(),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Opens and closes one connection; errors surface to the caller.
    pub async fn probe(&self) -> Result<()> {
        let connection = self.connector.connect().await?;
        connection.close().await;
        info!("Connected to {}", self.connector.describe());
        Ok(())
    }

    /// Returns `false` on any connect or put failure.
    pub async fn publish(&self, location_id: &str, available_spots: i32) -> bool {
        match self.write_record(location_id, available_spots).await {
            Ok(record) => {
                info!(
                    "Store updated: location {} -> {} spots available at {}",
                    record.location_id, record.available_spots, record.last_updated
                );
                true
            }
            Err(err) => {
                error!("Error updating store: {}", err);
                false
            }
        }
    }

    async fn write_record(
        &self,
        location_id: &str,
        available_spots: i32,
    ) -> Result<AvailabilityRecord> {
        let mut connection = self.connector.connect().await?;
        let record = AvailabilityRecord::new(location_id, available_spots, Utc::now());
        let result = connection
            .put(
                &self.table,
                record.row_key(),
                &record.cells(&self.column_family),
            )
            .await;
        connection.close().await;
        result.map(|()| record)
    }
}

/// A put captured by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPut {
    pub table: String,
    pub row_key: Vec<u8>,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Default)]
struct MemoryState {
    puts: Mutex<Vec<StoredPut>>,
    fail_connect: AtomicBool,
    fail_put: AtomicBool,
    connects: AtomicU32,
    closes: AtomicU32,
}

/// In-process store used for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_put(&self, fail: bool) {
        self.state.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub async fn snapshot_puts(&self) -> Vec<StoredPut> {
        self.state.puts.lock().await.clone()
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(store_error("connection refused"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }

    fn describe(&self) -> String {
        "in-memory store".into()
    }
}

struct MemoryConnection {
    state: Arc<MemoryState>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn put(&mut self, table: &str, row_key: &[u8], cells: &[Cell]) -> Result<()> {
        if self.state.fail_put.load(Ordering::SeqCst) {
            return Err(store_error("region server unavailable"));
        }
        self.state.puts.lock().await.push(StoredPut {
            table: table.to_string(),
            row_key: row_key.to_vec(),
            cells: cells.to_vec(),
        });
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn store_error(message: impl Into<String>) -> ParkwatchError {
    ParkwatchError::Store(message.into())
}
