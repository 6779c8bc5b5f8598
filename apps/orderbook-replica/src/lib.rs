#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Orderbook Replica - Local Order Book Mirror
//!
//! Maintains a local replica of one symbol's bid/ask ladder. A REST snapshot
//! seeds the book and a WebSocket delta stream keeps it current; when the
//! stream cannot be kept alive the replica degrades to periodic snapshot
//! polling. Every mutation carries the epoch of the subscription it belongs
//! to, so messages from a previous symbol can never touch the current book.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure book types
//!   - `book`: Price-level tables, levels, sides
//!   - `replica`: Replica state, connectivity, projections
//!   - `subscription`: Symbols, epochs, subscription records
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot source and stream connector contracts
//!   - `services`: Feed state machine, fallback poller, replica engine
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bybit`: REST snapshot client and WebSocket connector
//!   - `config`: Environment-driven settings
//!   - `http`: Health, metrics, book and control endpoints
//!   - `metrics` / `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//! REST snapshot --+
//!                 +--> FeedConnection --(epoch)--> ReplicaHandle --> /book, watch
//! WS deltas ------+         |
//!                           +--(failed)--> FallbackPoller --(epoch)--+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Order book types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::book::{Level, PriceLevelTable, Side, SortOrder, TopLevels, format_price, format_qty};
pub use domain::replica::{BookView, Connectivity, ReplicaState};
pub use domain::subscription::{Epoch, SubscriptionRecord, Symbol, SymbolError};

// Ports
pub use application::ports::{
    BookSnapshot, BookUpdate, ProtocolViolation, SnapshotFetchError, SnapshotSource,
    StreamConnector, StreamRequest, TransportError, TransportEvent, UpdateKind,
};

// Services
pub use application::services::{
    EngineError, EngineSettings, FeedDeps, FeedSettings, ReconnectConfig, ReplicaEngine,
    ReplicaHandle, ReplicaStatus,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ReplicaConfig};

// Venue adapters
pub use infrastructure::bybit::{BybitRestClient, BybitStreamConnector, RestClientConfig, StreamClientConfig};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
