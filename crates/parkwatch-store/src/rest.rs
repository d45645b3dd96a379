//! HBase REST gateway client.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use parkwatch_types::{config::StoreConfig, record::Cell, Result};
use reqwest::{header::ACCEPT, Client, Url};
use serde::Serialize;
use tokio::time::Duration;
use tracing::debug;

use crate::{store_error, StoreConnection, StoreConnector};

/// CellSet document accepted by `PUT /<table>/<row>`.
#[derive(Debug, Serialize)]
pub struct CellSet {
    #[serde(rename = "Row")]
    pub rows: Vec<RowBody>,
}

#[derive(Debug, Serialize)]
pub struct RowBody {
    pub key: String,
    #[serde(rename = "Cell")]
    pub cells: Vec<CellBody>,
}

#[derive(Debug, Serialize)]
pub struct CellBody {
    pub column: String,
    #[serde(rename = "$")]
    pub value: String,
}

impl CellSet {
    pub fn single_row(row_key: &[u8], cells: &[Cell]) -> Self {
        Self {
            rows: vec![RowBody {
                key: BASE64_STANDARD.encode(row_key),
                cells: cells
                    .iter()
                    .map(|cell| CellBody {
                        column: BASE64_STANDARD.encode(cell.column.as_bytes()),
                        value: BASE64_STANDARD.encode(&cell.value),
                    })
                    .collect(),
            }],
        }
    }
}

pub struct RestGateway {
    base_url: String,
    timeout: Duration,
}

impl RestGateway {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            base_url: config.base_url(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl StoreConnector for RestGateway {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        let base = Url::parse(&self.base_url)
            .map_err(|err| store_error(format!("invalid gateway url {}: {err}", self.base_url)))?;
        let client = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|err| store_error(format!("failed to build HTTP client: {err}")))?;

        let version_url = base
            .join("version/cluster")
            .map_err(|err| store_error(format!("invalid gateway url: {err}")))?;
        let response = client
            .get(version_url)
            .header(ACCEPT, "text/plain")
            .send()
            .await
            .map_err(|err| store_error(format!("gateway unreachable: {err}")))?;
        if !response.status().is_success() {
            return Err(store_error(format!(
                "gateway version check failed: {}",
                response.status()
            )));
        }
        debug!("Connected to store gateway at {}", base);
        Ok(Box::new(RestConnection { client, base }))
    }

    fn describe(&self) -> String {
        format!("HBase REST gateway at {}", self.base_url)
    }
}

struct RestConnection {
    client: Client,
    base: Url,
}

impl RestConnection {
    fn row_url(&self, table: &str, row_key: &[u8]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| store_error("gateway url cannot hold a path"))?
            .pop_if_empty()
            .push(table)
            .push(&String::from_utf8_lossy(row_key));
        Ok(url)
    }
}

#[async_trait]
impl StoreConnection for RestConnection {
    async fn put(&mut self, table: &str, row_key: &[u8], cells: &[Cell]) -> Result<()> {
        let url = self.row_url(table, row_key)?;
        let body = CellSet::single_row(row_key, cells);
        let response = self
            .client
            .put(url)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| store_error(format!("put request failed: {err}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(store_error(format!(
                "put rejected by gateway: {}",
                response.status()
            )))
        }
    }

    async fn close(self: Box<Self>) {
        debug!("Closing store connection to {}", self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_set_encodes_keys_and_values_in_base64() {
        let cells = vec![Cell {
            column: "stat:available_spots".into(),
            value: 9_i32.to_be_bytes().to_vec(),
        }];
        let body = serde_json::to_value(CellSet::single_row(b"1", &cells)).unwrap();

        assert_eq!(body["Row"][0]["key"], "MQ==");
        assert_eq!(
            body["Row"][0]["Cell"][0]["column"],
            "c3RhdDphdmFpbGFibGVfc3BvdHM="
        );
        assert_eq!(body["Row"][0]["Cell"][0]["$"], "AAAACQ==");
    }

    #[test]
    fn row_url_escapes_segments() {
        let connection = RestConnection {
            client: Client::new(),
            base: Url::parse("http://gateway:8080").unwrap(),
        };
        let url = connection.row_url("availability", b"lot 1").unwrap();
        assert_eq!(url.as_str(), "http://gateway:8080/availability/lot%201");
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_to_connect() {
        let gateway = RestGateway::new(&StoreConfig {
            host: "127.0.0.1".into(),
            port: 9,
            timeout_ms: 500,
            ..StoreConfig::default()
        });
        assert!(gateway.connect().await.is_err());
    }
}
