//! Bybit V5 Wire Types
//!
//! Serde models for the public order book REST endpoint and the public
//! WebSocket stream. Prices and quantities stay as strings here; the codec
//! turns them into decimals.

use serde::{Deserialize, Serialize};

/// One `[price, quantity]` pair as sent by the venue.
pub type RawLevel = [String; 2];

// =============================================================================
// REST
// =============================================================================

/// `GET /v5/market/orderbook` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestEnvelope<T> {
    /// `0` on success.
    pub ret_code: i64,
    /// Human-readable status.
    #[serde(default)]
    pub ret_msg: String,
    /// Payload; absent or empty on error.
    pub result: Option<T>,
}

/// Order book payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderbookResult {
    /// Symbol.
    #[serde(default)]
    pub s: String,
    /// Bids.
    #[serde(default)]
    pub b: Vec<RawLevel>,
    /// Asks.
    #[serde(default)]
    pub a: Vec<RawLevel>,
    /// Venue timestamp (ms).
    #[serde(default)]
    pub ts: Option<i64>,
    /// Update id.
    #[serde(default)]
    pub u: Option<u64>,
}

// =============================================================================
// WebSocket: Outbound
// =============================================================================

/// Client operation (`subscribe`, `unsubscribe`, `ping`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpRequest {
    /// Operation name.
    pub op: String,
    /// Topics, omitted for `ping`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl OpRequest {
    /// Subscribe to `topics`.
    #[must_use]
    pub fn subscribe(topics: Vec<String>) -> Self {
        Self {
            op: "subscribe".to_string(),
            args: topics,
        }
    }

    /// Application-level keepalive.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            op: "ping".to_string(),
            args: Vec::new(),
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// WebSocket: Inbound
// =============================================================================

/// Response to a client operation.
#[derive(Debug, Clone, Deserialize)]
pub struct OpResponse {
    /// Operation being acknowledged.
    pub op: String,
    /// Whether the venue accepted it.
    #[serde(default)]
    pub success: Option<bool>,
    /// Venue message.
    #[serde(default)]
    pub ret_msg: Option<String>,
    /// Connection id.
    #[serde(default)]
    pub conn_id: Option<String>,
}

/// `orderbook.{depth}.{symbol}` push.
#[derive(Debug, Clone, Deserialize)]
pub struct BookFrame {
    /// Topic the frame belongs to.
    pub topic: String,
    /// `snapshot` or `delta`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Venue timestamp (ms).
    #[serde(default)]
    pub ts: Option<i64>,
    /// Payload, sent as an object or a one-element array.
    pub data: BookDataShape,
}

/// Tolerates both payload shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BookDataShape {
    /// `data: {...}`.
    Object(BookData),
    /// `data: [{...}]`.
    Array(Vec<BookData>),
}

impl BookDataShape {
    /// The payload, if present.
    #[must_use]
    pub fn into_data(self) -> Option<BookData> {
        match self {
            Self::Object(data) => Some(data),
            Self::Array(items) => items.into_iter().next(),
        }
    }
}

/// Book levels inside a push.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookData {
    /// Symbol.
    #[serde(default)]
    pub s: String,
    /// Bid changes.
    #[serde(default)]
    pub b: Vec<RawLevel>,
    /// Ask changes.
    #[serde(default)]
    pub a: Vec<RawLevel>,
    /// Update id.
    #[serde(default)]
    pub u: Option<u64>,
    /// Cross sequence.
    #[serde(default)]
    pub seq: Option<u64>,
}
