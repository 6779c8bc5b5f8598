//! Streaming Port
//!
//! A connector opens one streaming subscription and hands back a channel of
//! decoded events. The connection stays open until the cancellation token
//! passed to [`StreamConnector::open`] fires or the receiver is dropped, at
//! which point the adapter closes the transport.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::book::Level;
use crate::domain::subscription::Symbol;

// =============================================================================
// Request
// =============================================================================

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Tracked pair.
    pub symbol: Symbol,
    /// Levels per side carried by the stream.
    pub depth: u32,
}

impl StreamRequest {
    /// Create a request.
    #[must_use]
    pub const fn new(symbol: Symbol, depth: u32) -> Self {
        Self { symbol, depth }
    }

    /// Depth topic for this request (`orderbook.{depth}.{SYMBOL}`).
    #[must_use]
    pub fn topic(&self) -> String {
        format!("orderbook.{}.{}", self.depth, self.symbol)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Whether a book message replaces or patches the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Full resynchronisation.
    Snapshot,
    /// Incremental level changes.
    Delta,
}

/// One decoded book message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookUpdate {
    /// Symbol the message is about.
    pub symbol: String,
    /// Snapshot or delta.
    pub kind: UpdateKind,
    /// Bid level changes.
    pub bids: Vec<Level>,
    /// Ask level changes.
    pub asks: Vec<Level>,
}

/// Event delivered by an open stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Venue acknowledged the subscription.
    Subscribed,
    /// Book message.
    Book(BookUpdate),
    /// A frame that could not be used; the stream is otherwise healthy.
    Violation(ProtocolViolation),
    /// Transport closed without an error (remote close, drop, idle timeout).
    Closed {
        /// Close reason, when the peer gave one.
        reason: Option<String>,
    },
    /// Transport-level failure.
    Error(TransportError),
}

// =============================================================================
// Errors
// =============================================================================

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("stream connect failed: {0}")]
    Connect(String),

    /// Error reported by the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Venue refused the subscription.
    #[error("subscription rejected: {0}")]
    Rejected(String),

    /// Outbound frame could not be written.
    #[error("failed to send frame: {0}")]
    Send(String),

    /// Reconnect policy ran out of attempts.
    #[error("reconnect attempts exhausted after {0}")]
    ReconnectExhausted(u32),
}

/// A single unusable inbound message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// Frame was not valid JSON or did not match the schema.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A level had an unparseable or negative price or quantity.
    #[error("invalid level: {0}")]
    InvalidLevel(String),

    /// Book message with an unknown `type`.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Message for a symbol other than the subscribed one.
    #[error("message for {actual} on subscription for {expected}")]
    WrongSymbol {
        /// Subscribed symbol.
        expected: String,
        /// Symbol carried by the message.
        actual: String,
    },
}

// =============================================================================
// Connector
// =============================================================================

/// Opens streaming subscriptions.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Connect, send the subscribe request and start delivering events.
    ///
    /// The adapter must close the transport once `cancel` fires.
    async fn open(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;
}
