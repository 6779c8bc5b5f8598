//! Replica Configuration Settings
//!
//! Configuration types for the replica service, loaded from environment
//! variables. Unparseable numbers fall back to their defaults.

use std::time::Duration;

use crate::application::services::{
    DEFAULT_POLL_INTERVAL, DEFAULT_RECONNECT_DELAY, EngineSettings, FeedSettings, ReconnectConfig,
};
use crate::domain::subscription::{Symbol, SymbolError};
use crate::infrastructure::bybit::{HeartbeatConfig, RestClientConfig, StreamClientConfig};

/// Venue endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueSettings {
    /// REST base URL.
    pub rest_url: String,
    /// Public stream base URL, without the category segment.
    pub ws_url: String,
    /// Product category.
    pub category: String,
    /// Snapshot request timeout.
    pub http_timeout: Duration,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            rest_url: "https://api.bybit.com".to_string(),
            ws_url: "wss://stream.bybit.com/v5/public".to_string(),
            category: "spot".to_string(),
            http_timeout: Duration::from_millis(5000),
        }
    }
}

/// Stream connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive reconnects before falling back to polling (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let heartbeat = HeartbeatConfig::default();
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: 0,
            heartbeat_interval: heartbeat.ping_interval,
            heartbeat_timeout: heartbeat.pong_timeout,
        }
    }
}

/// Fallback polling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    /// Time between snapshot polls while degraded.
    pub poll_interval: Duration,
    /// Automatic streaming retry while degraded (`None` = manual only).
    pub degraded_retry_interval: Option<Duration>,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            degraded_retry_interval: None,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP port for health, metrics, book and control.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8083 }
    }
}

/// Complete replica configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// Symbol tracked at startup.
    pub symbol: Symbol,
    /// Levels per side requested from the venue.
    pub snapshot_depth: u32,
    /// Levels per side shown by default.
    pub display_depth: usize,
    /// Venue endpoints.
    pub venue: VenueSettings,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Fallback polling settings.
    pub polling: PollingSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl ReplicaConfig {
    /// Default symbol.
    pub const DEFAULT_SYMBOL: &'static str = "BTCUSDT";
    /// Default snapshot depth.
    pub const DEFAULT_SNAPSHOT_DEPTH: u32 = 50;
    /// Default display depth.
    pub const DEFAULT_DISPLAY_DEPTH: usize = 15;

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is invalid or an endpoint is empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is invalid or an endpoint is empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let symbol = Symbol::parse(
            &lookup("BOOK_SYMBOL").unwrap_or_else(|| Self::DEFAULT_SYMBOL.to_string()),
        )?;

        let defaults = VenueSettings::default();
        let venue = VenueSettings {
            rest_url: non_empty(&lookup, "BYBIT_REST_URL", defaults.rest_url)?,
            ws_url: non_empty(&lookup, "BYBIT_WS_URL", defaults.ws_url)?,
            category: non_empty(&lookup, "BOOK_CATEGORY", defaults.category)?,
            http_timeout: parse_env_duration_millis(
                &lookup,
                "BOOK_HTTP_TIMEOUT_MS",
                defaults.http_timeout,
            ),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            reconnect_delay: parse_env_duration_millis(
                &lookup,
                "BOOK_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            ),
            max_reconnect_attempts: parse_env_u32(
                &lookup,
                "BOOK_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "BOOK_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                &lookup,
                "BOOK_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
        };

        let polling = PollingSettings {
            poll_interval: parse_env_duration_millis(
                &lookup,
                "BOOK_POLL_INTERVAL_MS",
                PollingSettings::default().poll_interval,
            ),
            degraded_retry_interval: lookup("BOOK_DEGRADED_RETRY_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };

        let server = ServerSettings {
            http_port: parse_env_u16(&lookup, "BOOK_HTTP_PORT", ServerSettings::default().http_port),
        };

        Ok(Self {
            symbol,
            snapshot_depth: parse_env_u32(
                &lookup,
                "BOOK_SNAPSHOT_DEPTH",
                Self::DEFAULT_SNAPSHOT_DEPTH,
            )
            .max(1),
            display_depth: parse_env_usize(
                &lookup,
                "BOOK_DISPLAY_DEPTH",
                Self::DEFAULT_DISPLAY_DEPTH,
            ),
            venue,
            stream,
            polling,
            server,
        })
    }

    /// Snapshot client settings.
    #[must_use]
    pub fn rest_client_config(&self) -> RestClientConfig {
        RestClientConfig {
            base_url: self.venue.rest_url.clone(),
            category: self.venue.category.clone(),
            timeout: self.venue.http_timeout,
        }
    }

    /// Stream connector settings.
    #[must_use]
    pub fn stream_client_config(&self) -> StreamClientConfig {
        StreamClientConfig {
            url: self.stream_url(),
            heartbeat: HeartbeatConfig {
                ping_interval: self.stream.heartbeat_interval,
                pong_timeout: self.stream.heartbeat_timeout,
            },
            ..StreamClientConfig::default()
        }
    }

    /// Engine tuning.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            feed: FeedSettings {
                snapshot_depth: self.snapshot_depth,
                reconnect: ReconnectConfig::fixed(self.stream.reconnect_delay)
                    .with_max_attempts(self.stream.max_reconnect_attempts),
            },
            poll_interval: self.polling.poll_interval,
            degraded_retry_interval: self.polling.degraded_retry_interval,
            ..EngineSettings::default()
        }
    }

    /// Public stream URL for the configured category.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.venue.ws_url.trim_end_matches('/'),
            self.venue.category
        )
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// `BOOK_SYMBOL` failed validation.
    #[error("invalid BOOK_SYMBOL: {0}")]
    InvalidSymbol(#[from] SymbolError),
}

fn non_empty<F>(lookup: &F, key: &str, default: String) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Some(value) => Ok(value.trim().to_string()),
        None => Ok(default),
    }
}

fn parse_env_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .map_or(default, Duration::from_millis)
}
