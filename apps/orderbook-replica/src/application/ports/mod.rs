//! Port Interfaces
//!
//! Contracts between the replica services and the venue adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SnapshotSource`: one-shot full book snapshot for a symbol
//! - `StreamConnector`: opens a streaming subscription and yields decoded events

mod snapshot;
mod stream;

pub use snapshot::{BookSnapshot, SnapshotFetchError, SnapshotSource};
pub use stream::{
    BookUpdate, ProtocolViolation, StreamConnector, StreamRequest, TransportError, TransportEvent,
    UpdateKind,
};
