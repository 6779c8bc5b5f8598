//! Application Layer - Replica services and port definitions.
//!
//! Services here own the subscription lifecycle. They talk to the venue only
//! through the traits in [`ports`].

/// Port interfaces for the venue adapters.
pub mod ports;

/// Replica ownership, feed lifecycle, polling and symbol switching.
pub mod services;
