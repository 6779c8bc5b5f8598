//! Configuration Module
//!
//! Configuration loading for the replica service.

mod settings;

pub use settings::{
    ConfigError, PollingSettings, ReplicaConfig, ServerSettings, StreamSettings, VenueSettings,
};
