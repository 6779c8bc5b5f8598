//! Bybit V5 Adapters
//!
//! Public market data only, no authentication:
//!
//! - **REST**: `GET /v5/market/orderbook` snapshots ([`BybitRestClient`])
//! - **WebSocket**: `orderbook.{depth}.{SYMBOL}` pushes ([`BybitStreamConnector`])

pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod rest;
pub mod stream;

pub use codec::{BybitCodec, Inbound, parse_levels};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
pub use messages::{BookData, BookFrame, OpRequest, OpResponse, OrderbookResult, RestEnvelope};
pub use rest::{BybitRestClient, RestClientConfig};
pub use stream::{BybitStreamConnector, StreamClientConfig};
