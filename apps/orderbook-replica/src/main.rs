//! Orderbook Replica Binary
//!
//! Tracks one symbol's order book and serves it over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin orderbook-replica
//! ```
//!
//! # Environment Variables
//!
//! - `BOOK_SYMBOL`: Symbol tracked at startup (default: BTCUSDT)
//! - `BOOK_CATEGORY`: Venue product category (default: spot)
//! - `BOOK_SNAPSHOT_DEPTH`: Levels per side requested (default: 50)
//! - `BOOK_DISPLAY_DEPTH`: Levels per side shown by default (default: 15)
//! - `BYBIT_REST_URL`: REST base URL (default: <https://api.bybit.com>)
//! - `BYBIT_WS_URL`: Public stream base URL (default: <wss://stream.bybit.com/v5/public>)
//! - `BOOK_HTTP_TIMEOUT_MS`: Snapshot request timeout (default: 5000)
//! - `BOOK_RECONNECT_DELAY_MS`: Delay between reconnects (default: 3000)
//! - `BOOK_MAX_RECONNECT_ATTEMPTS`: Reconnects before polling, 0 = unlimited (default: 0)
//! - `BOOK_POLL_INTERVAL_MS`: Fallback poll interval (default: 2000)
//! - `BOOK_DEGRADED_RETRY_SECS`: Automatic streaming retry while polling (default: off)
//! - `BOOK_HEARTBEAT_INTERVAL_SECS` / `BOOK_HEARTBEAT_TIMEOUT_SECS` (default: 20 / 20)
//! - `BOOK_HTTP_PORT`: Health, metrics, book and control port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `RUST_LOG`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use orderbook_replica::infrastructure::telemetry;
use orderbook_replica::{
    BybitRestClient, BybitStreamConnector, FeedDeps, HttpServer, HttpState, ReplicaConfig,
    ReplicaEngine, ReplicaHandle, format_price, format_qty, init_metrics,
};
use tokio::signal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum gap between top-of-book log lines.
const TOP_OF_BOOK_LOG_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Orderbook Replica");

    let _metrics_handle = init_metrics();

    let config = ReplicaConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let snapshots = BybitRestClient::new(config.rest_client_config())
        .context("failed to build snapshot client")?;
    let connector = BybitStreamConnector::new(config.stream_client_config());
    let deps = FeedDeps {
        snapshots: Arc::new(snapshots),
        connector: Arc::new(connector),
    };
    let engine = Arc::new(ReplicaEngine::new(deps, config.engine_settings()));

    let http_state = Arc::new(HttpState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&engine),
        config.display_depth,
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        http_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tokio::spawn(log_top_of_book(
        engine.replica().clone(),
        shutdown_token.clone(),
    ));

    engine
        .subscribe(config.symbol.as_str())
        .await
        .context("failed to start subscription")?;

    tracing::info!("Orderbook replica ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, engine.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Engine shutdown timed out"
        );
    }

    tracing::info!("Orderbook replica stopped");
    Ok(())
}

/// Log best bid/ask whenever the replica changes, at most once per interval.
async fn log_top_of_book(replica: ReplicaHandle, cancel: CancellationToken) {
    let mut status = replica.watch();
    let mut last_logged: Option<Instant> = None;
    let mut last_revision = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let revision = status.borrow_and_update().revision;
        if revision == last_revision
            || last_logged.is_some_and(|at| at.elapsed() < TOP_OF_BOOK_LOG_INTERVAL)
        {
            continue;
        }
        last_revision = revision;
        last_logged = Some(Instant::now());

        let view = replica.view(1);
        let (Some(bid), Some(ask)) = (view.bids.iter().next(), view.asks.iter().next()) else {
            continue;
        };
        tracing::info!(
            symbol = view.symbol.as_deref().unwrap_or("-"),
            connectivity = view.connectivity.as_str(),
            bid = %format_price(bid.price),
            bid_qty = %format_qty(bid.quantity),
            ask = %format_price(ask.price),
            ask_qty = %format_qty(ask.quantity),
            spread = %view.spread.map(format_price).unwrap_or_default(),
            spread_pct = %view.spread_pct.map(|p| format!("{p:.4}%")).unwrap_or_default(),
            revision,
            "Top of book"
        );
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ReplicaConfig) {
    tracing::info!(
        symbol = %config.symbol,
        category = %config.venue.category,
        snapshot_depth = config.snapshot_depth,
        http_port = config.server.http_port,
        reconnect_delay_ms = u64::try_from(config.stream.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        poll_interval_ms = u64::try_from(config.polling.poll_interval.as_millis()).unwrap_or(u64::MAX),
        degraded_retry_secs = config.polling.degraded_retry_interval.map(|d| d.as_secs()),
        "Configuration loaded"
    );
    tracing::debug!(
        rest_url = %config.venue.rest_url,
        stream_url = %config.stream_url(),
        "Venue endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
