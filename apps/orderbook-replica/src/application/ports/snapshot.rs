//! Snapshot Port
//!
//! Request `(symbol, depth)`, receive every level on both sides. Providers
//! return levels in any order; readers sort.

use async_trait::async_trait;

use crate::domain::book::Level;
use crate::domain::subscription::Symbol;

/// Full statement of both sides at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    /// Symbol the venue reported for this snapshot.
    pub symbol: String,
    /// Bid levels, any order.
    pub bids: Vec<Level>,
    /// Ask levels, any order.
    pub asks: Vec<Level>,
}

impl BookSnapshot {
    /// Create a snapshot.
    #[must_use]
    pub fn new(symbol: impl Into<String>, bids: Vec<Level>, asks: Vec<Level>) -> Self {
        Self {
            symbol: symbol.into(),
            bids,
            asks,
        }
    }
}

/// Snapshot request failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotFetchError {
    /// Request never produced a response.
    #[error("snapshot request failed: {0}")]
    Http(String),

    /// Non-success HTTP status.
    #[error("snapshot request returned HTTP {0}")]
    Status(u16),

    /// Venue envelope reported an error.
    #[error("venue rejected snapshot request ({code}): {message}")]
    Venue {
        /// Venue return code.
        code: i64,
        /// Venue message.
        message: String,
    },

    /// Body could not be decoded.
    #[error("snapshot body could not be decoded: {0}")]
    Decode(String),

    /// A level had an unparseable or negative price or quantity.
    #[error("snapshot contained an invalid level: {0}")]
    InvalidLevel(String),

    /// Venue answered for a different symbol.
    #[error("snapshot for {actual} returned while requesting {expected}")]
    SymbolMismatch {
        /// Requested symbol.
        expected: String,
        /// Symbol in the response.
        actual: String,
    },
}

/// Source of full book snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch up to `depth` levels per side for `symbol`.
    async fn fetch_snapshot(
        &self,
        symbol: &Symbol,
        depth: u32,
    ) -> Result<BookSnapshot, SnapshotFetchError>;
}
