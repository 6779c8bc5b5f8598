//! Bybit REST Snapshot Client
//!
//! `GET {base}/v5/market/orderbook?category={category}&symbol={SYMBOL}&limit={depth}`.
//! A single attempt per call; retrying is the caller's job (reconnect loop or
//! poll interval).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use super::codec::parse_levels;
use super::messages::{OrderbookResult, RestEnvelope};
use crate::application::ports::{BookSnapshot, SnapshotFetchError, SnapshotSource};
use crate::domain::subscription::Symbol;
use crate::infrastructure::metrics;

/// Snapshot client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestClientConfig {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Product category (`spot`, `linear`, ...).
    pub category: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bybit.com".to_string(),
            category: "spot".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// [`SnapshotSource`] backed by the Bybit REST API.
#[derive(Debug, Clone)]
pub struct BybitRestClient {
    client: Client,
    config: RestClientConfig,
}

impl BybitRestClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotFetchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: RestClientConfig) -> Result<Self, SnapshotFetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SnapshotFetchError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/v5/market/orderbook",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl SnapshotSource for BybitRestClient {
    async fn fetch_snapshot(
        &self,
        symbol: &Symbol,
        depth: u32,
    ) -> Result<BookSnapshot, SnapshotFetchError> {
        let started = Instant::now();
        let limit = depth.to_string();
        let response = self
            .client
            .get(self.url())
            .query(&[
                ("category", self.config.category.as_str()),
                ("symbol", symbol.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SnapshotFetchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotFetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SnapshotFetchError::Http(e.to_string()))?;
        metrics::record_snapshot_fetch_duration(started.elapsed());

        let envelope: RestEnvelope<OrderbookResult> =
            serde_json::from_str(&body).map_err(|e| SnapshotFetchError::Decode(e.to_string()))?;
        if envelope.ret_code != 0 {
            return Err(SnapshotFetchError::Venue {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }
        let result = envelope
            .result
            .ok_or_else(|| SnapshotFetchError::Decode("missing result".to_string()))?;

        tracing::debug!(
            symbol = %symbol,
            bids = result.b.len(),
            asks = result.a.len(),
            update_id = ?result.u,
            "Fetched order book snapshot"
        );

        Ok(BookSnapshot::new(
            result.s,
            parse_levels(&result.b).map_err(SnapshotFetchError::InvalidLevel)?,
            parse_levels(&result.a).map_err(SnapshotFetchError::InvalidLevel)?,
        ))
    }
}
