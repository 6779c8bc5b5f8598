//! Application Services
//!
//! - `ReplicaHandle`: epoch-guarded owner of the replica state
//! - `FeedConnection`: snapshot + stream state machine with reconnect
//! - `FallbackPoller`: periodic snapshot refresh while degraded
//! - `ReplicaEngine`: serialised symbol switching and the control surface

mod engine;
mod feed;
mod poller;
mod reconnect;
mod replica;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineError, EngineSettings, ReplicaEngine};
pub use feed::{FeedConnection, FeedDeps, FeedFailure, FeedOutcome, FeedPhase, FeedSettings};
pub use poller::{DEFAULT_POLL_INTERVAL, FallbackPoller, MIN_POLL_INTERVAL};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectConfig, ReconnectPolicy};
pub use replica::{ReplicaHandle, ReplicaStatus, StaleEpoch};
