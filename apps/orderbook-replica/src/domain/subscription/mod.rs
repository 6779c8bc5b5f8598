//! Subscription Identity Types
//!
//! A subscription is the single live feed for the currently selected trading
//! pair. Each one is tagged with an [`Epoch`]; anything that arrives carrying
//! an older epoch belongs to a subscription that has already been disposed.

use std::fmt;

use serde::Serialize;

// =============================================================================
// Symbol
// =============================================================================

/// Venue trading pair, normalised to upper case (e.g. `BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Maximum accepted symbol length.
    pub const MAX_LEN: usize = 32;

    /// Parse and normalise a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty, too long, or contains
    /// anything other than ASCII letters and digits.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(SymbolError::TooLong(trimmed.len()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SymbolError::InvalidCharacters(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Borrow the symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Invalid trading pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Blank input.
    #[error("symbol cannot be empty")]
    Empty,
    /// Input longer than [`Symbol::MAX_LEN`].
    #[error("symbol is {0} characters, longer than the limit")]
    TooLong(usize),
    /// Input with separators or punctuation.
    #[error("symbol {0:?} must be ASCII letters and digits only")]
    InvalidCharacters(String),
}

// =============================================================================
// Epoch
// =============================================================================

/// Monotonic tag identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// Epoch before any subscription has started.
    pub const ZERO: Self = Self(0);

    /// The epoch that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Raw value, for logs.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Subscription Record
// =============================================================================

/// Identity of one live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    /// Tracked pair.
    pub symbol: Symbol,
    /// Epoch assigned when the subscription started.
    pub epoch: Epoch,
}

impl SubscriptionRecord {
    /// Create a record.
    #[must_use]
    pub const fn new(symbol: Symbol, epoch: Epoch) -> Self {
        Self { symbol, epoch }
    }
}

// =============================================================================
// Tests
// =============================================================================
