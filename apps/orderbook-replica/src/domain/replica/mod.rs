//! Replica State
//!
//! The local view of one symbol's book: a bid table, an ask table, and the
//! connectivity of the feed that keeps them fresh. Snapshots replace both
//! tables wholesale; deltas patch them in place.
//!
//! Every read here is pure and safe to call in any connectivity state,
//! including while degraded to polling (last-known data is returned).

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::book::{Level, PriceLevelTable, Side, TopLevels};

// =============================================================================
// Connectivity
// =============================================================================

/// Feed connectivity as seen by readers of the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// No subscription is active.
    #[default]
    Idle,
    /// Waiting for the initial snapshot or reconnecting.
    Connecting,
    /// Snapshot applied, stream not yet confirmed.
    SnapshotLoaded,
    /// Stream confirmed; deltas are being applied.
    Streaming,
    /// Stream unavailable; refreshed by periodic snapshots.
    Degraded,
    /// Stream failed; the polling fallback is about to take over.
    Failed,
}

impl Connectivity {
    /// Label used in logs, metrics and HTTP responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::SnapshotLoaded => "snapshot_loaded",
            Self::Streaming => "streaming",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    /// Numeric code for the connectivity gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Idle => 0.0,
            Self::Connecting => 1.0,
            Self::SnapshotLoaded => 2.0,
            Self::Streaming => 3.0,
            Self::Degraded => 4.0,
            Self::Failed => 5.0,
        }
    }
}

// =============================================================================
// Replica State
// =============================================================================

/// Local replica of one symbol's book.
#[derive(Debug, Clone, Default)]
pub struct ReplicaState {
    symbol: Option<String>,
    bids: PriceLevelTable,
    asks: PriceLevelTable,
    connectivity: Connectivity,
}

impl ReplicaState {
    /// Empty replica with no symbol.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// Empty replica for `symbol`, waiting for its first snapshot.
    #[must_use]
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            connectivity: Connectivity::Connecting,
            ..Self::default()
        }
    }

    /// Replace both tables with a full snapshot.
    pub fn apply_snapshot<B, A>(&mut self, bids: B, asks: A)
    where
        B: IntoIterator<Item = Level>,
        A: IntoIterator<Item = Level>,
    {
        self.bids.replace(bids);
        self.asks.replace(asks);
    }

    /// Patch both tables with level updates.
    pub fn apply_delta<B, A>(&mut self, bids: B, asks: A)
    where
        B: IntoIterator<Item = Level>,
        A: IntoIterator<Item = Level>,
    {
        self.bids.apply_levels(bids);
        self.asks.apply_levels(asks);
    }

    /// Set the connectivity.
    pub const fn set_connectivity(&mut self, connectivity: Connectivity) {
        self.connectivity = connectivity;
    }

    /// Tracked symbol, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Current connectivity.
    #[must_use]
    pub const fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// Table for one side.
    #[must_use]
    pub const fn side(&self, side: Side) -> &PriceLevelTable {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Up to `n` bids, highest first.
    #[must_use]
    pub fn top_bids(&self, n: usize) -> TopLevels {
        self.bids.top_n(n, Side::Bid.sort_order())
    }

    /// Up to `n` asks, lowest first.
    #[must_use]
    pub fn top_asks(&self, n: usize) -> TopLevels {
        self.asks.top_n(n, Side::Ask.sort_order())
    }

    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.best(Side::Bid.sort_order())
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<Level> {
        self.asks.best(Side::Ask.sort_order())
    }

    /// `best_ask - best_bid`, when both sides are populated.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Spread as a percentage of the best bid.
    #[must_use]
    pub fn spread_pct(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price;
        if bid.is_zero() {
            return None;
        }
        let spread = self.best_ask()?.price - bid;
        Some((spread / bid * Decimal::ONE_HUNDRED).round_dp(4))
    }

    /// Depth-limited projection for presentation.
    #[must_use]
    pub fn view(&self, depth: usize) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            connectivity: self.connectivity,
            bids: self.top_bids(depth),
            asks: self.top_asks(depth),
            best_bid: self.best_bid().map(|l| l.price),
            best_ask: self.best_ask().map(|l| l.price),
            spread: self.spread(),
            spread_pct: self.spread_pct(),
        }
    }
}

/// Sorted, depth-limited read of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookView {
    /// Tracked symbol.
    pub symbol: Option<String>,
    /// Connectivity at read time.
    pub connectivity: Connectivity,
    /// Bids, highest first.
    pub bids: TopLevels,
    /// Asks, lowest first.
    pub asks: TopLevels,
    /// Highest bid price.
    pub best_bid: Option<Decimal>,
    /// Lowest ask price.
    pub best_ask: Option<Decimal>,
    /// Ask minus bid.
    pub spread: Option<Decimal>,
    /// Spread over bid, in percent.
    pub spread_pct: Option<Decimal>,
}

// =============================================================================
// Tests
// =============================================================================
