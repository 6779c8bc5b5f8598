//! Price-Level Table
//!
//! One side of an order book: a mapping from price to aggregate resting
//! quantity. The table keeps no ordering of its own; ordered views are
//! produced on read because a streaming feed writes far more often than a
//! consumer renders.
//!
//! # Invariants
//!
//! - Prices are unique keys (`Decimal` equality ignores scale, so `100.0`
//!   and `100.00` are the same level).
//! - No stored level has a quantity `<= 0`. Writing a zero quantity removes
//!   the level.

use std::cmp::Ordering;
use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

mod format;

pub use format::{format_price, format_qty};

// =============================================================================
// Types
// =============================================================================

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Resting buy interest.
    Bid,
    /// Resting sell interest.
    Ask,
}

impl Side {
    /// Read order for this side: best price first.
    #[must_use]
    pub const fn sort_order(self) -> SortOrder {
        match self {
            Self::Bid => SortOrder::Descending,
            Self::Ask => SortOrder::Ascending,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

/// Price ordering for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Lowest price first.
    Ascending,
    /// Highest price first.
    Descending,
}

impl SortOrder {
    fn compare(self, a: &Decimal, b: &Decimal) -> Ordering {
        match self {
            Self::Ascending => a.cmp(b),
            Self::Descending => b.cmp(a),
        }
    }
}

/// A `(price, quantity)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Price of the level.
    pub price: Decimal,
    /// Aggregate quantity at the price. Zero means "remove".
    pub quantity: Decimal,
}

impl Level {
    /// Create a level.
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    /// Whether applying this level deletes the price.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.quantity <= Decimal::ZERO
    }

    /// Price times quantity, rounded to cents.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        (self.price * self.quantity).round_dp(2)
    }
}

// =============================================================================
// Price-Level Table
// =============================================================================

/// Unordered price → quantity table for one side of the book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceLevelTable {
    levels: HashMap<Decimal, Decimal>,
}

impl PriceLevelTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one level update.
    ///
    /// A zero (or negative) quantity removes the price; anything else
    /// inserts or overwrites it.
    pub fn apply_level(&mut self, level: Level) {
        if level.is_removal() {
            self.levels.remove(&level.price);
        } else {
            self.levels.insert(level.price, level.quantity);
        }
    }

    /// Apply a batch of level updates in order.
    pub fn apply_levels<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = Level>,
    {
        for level in levels {
            self.apply_level(level);
        }
    }

    /// Drop every level.
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Replace the whole table with `levels`.
    pub fn replace<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = Level>,
    {
        self.levels.clear();
        self.apply_levels(levels);
    }

    /// Quantity resting at `price`, if any.
    #[must_use]
    pub fn get(&self, price: &Decimal) -> Option<Decimal> {
        self.levels.get(price).copied()
    }

    /// Number of stored levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the table holds no levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The first level in `order`, found with a linear scan.
    #[must_use]
    pub fn best(&self, order: SortOrder) -> Option<Level> {
        self.levels
            .iter()
            .min_by(|(a, _), (b, _)| order.compare(a, b))
            .map(|(price, quantity)| Level::new(*price, *quantity))
    }

    /// Up to `n` levels sorted by `order`.
    ///
    /// Only the first `n` entries are fully sorted; the remainder of the
    /// table is partitioned away first.
    #[must_use]
    pub fn top_n(&self, n: usize, order: SortOrder) -> TopLevels {
        let mut levels: Vec<Level> = self
            .levels
            .iter()
            .map(|(price, quantity)| Level::new(*price, *quantity))
            .collect();

        if n == 0 {
            levels.clear();
        } else if n < levels.len() {
            levels.select_nth_unstable_by(n - 1, |a, b| order.compare(&a.price, &b.price));
            levels.truncate(n);
        }
        levels.sort_unstable_by(|a, b| order.compare(&a.price, &b.price));

        TopLevels { levels }
    }

    /// Every level in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = Level> + '_ {
        self.levels
            .iter()
            .map(|(price, quantity)| Level::new(*price, *quantity))
    }
}

// =============================================================================
// Top Levels
// =============================================================================

/// A finite, sorted read of one side.
///
/// Iterating does not consume it, so the same read can be walked any number
/// of times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TopLevels {
    levels: Vec<Level>,
}

impl TopLevels {
    /// Iterate the levels, best first.
    pub fn iter(&self) -> std::slice::Iter<'_, Level> {
        self.levels.iter()
    }

    /// Number of levels in the read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the read is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Borrow the levels as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Level] {
        &self.levels
    }

    /// Take ownership of the levels.
    #[must_use]
    pub fn into_vec(self) -> Vec<Level> {
        self.levels
    }
}

impl<'a> IntoIterator for &'a TopLevels {
    type Item = &'a Level;
    type IntoIter = std::slice::Iter<'a, Level>;

    fn into_iter(self) -> Self::IntoIter {
        self.levels.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================
