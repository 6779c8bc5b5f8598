//! HTTP Surface
//!
//! Health probes, Prometheus metrics, the book projection and the control
//! surface on one port.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (streaming, or polling with data)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /book?depth=N` - top of book
//! - `POST /symbol/{symbol}` - switch the tracked symbol
//! - `DELETE /symbol` - stop tracking
//! - `POST /retry` - leave fallback polling and retry the stream

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{EngineError, ReplicaEngine, ReplicaStatus};
use crate::domain::book::{Level, TopLevels, format_price, format_qty};
use crate::domain::replica::Connectivity;
use crate::domain::subscription::Epoch;
use crate::infrastructure::metrics::get_metrics_handle;

/// Deepest ladder `/book` will return.
pub const MAX_BOOK_DEPTH: usize = 200;

// =============================================================================
// Response Types
// =============================================================================

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming.
    Healthy,
    /// Serving data, but not from a live stream.
    Degraded,
    /// No subscription, or the subscription has failed.
    Unhealthy,
}

impl HealthStatus {
    /// Map replica connectivity to a health status.
    #[must_use]
    pub const fn from_connectivity(connectivity: Connectivity) -> Self {
        match connectivity {
            Connectivity::Streaming => Self::Healthy,
            Connectivity::Connecting | Connectivity::SnapshotLoaded | Connectivity::Degraded => {
                Self::Degraded
            }
            Connectivity::Idle | Connectivity::Failed => Self::Unhealthy,
        }
    }
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Replica status.
    pub replica: ReplicaStatus,
}

/// One ladder row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelRow {
    /// Price.
    pub price: Decimal,
    /// Quantity.
    pub quantity: Decimal,
    /// Price times quantity, to cents.
    pub notional: Decimal,
    /// Price at display precision.
    pub display_price: String,
    /// Quantity at display precision.
    pub display_qty: String,
}

impl From<&Level> for LevelRow {
    fn from(level: &Level) -> Self {
        Self {
            price: level.price,
            quantity: level.quantity,
            notional: level.notional(),
            display_price: format_price(level.price),
            display_qty: format_qty(level.quantity),
        }
    }
}

/// `GET /book` body.
#[derive(Debug, Clone, Serialize)]
pub struct BookResponse {
    /// Tracked symbol.
    pub symbol: Option<String>,
    /// Connectivity at read time.
    pub connectivity: Connectivity,
    /// Bids, highest first.
    pub bids: Vec<LevelRow>,
    /// Asks, lowest first.
    pub asks: Vec<LevelRow>,
    /// Highest bid.
    pub best_bid: Option<Decimal>,
    /// Lowest ask.
    pub best_ask: Option<Decimal>,
    /// Ask minus bid.
    pub spread: Option<Decimal>,
    /// Spread over bid, percent.
    pub spread_pct: Option<Decimal>,
    /// Replica revision the view was read at.
    pub revision: u64,
}

#[derive(Debug, Deserialize)]
struct BookQuery {
    depth: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SubscribedResponse {
    symbol: String,
    epoch: Epoch,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// =============================================================================
// Server
// =============================================================================

/// Shared handler state.
pub struct HttpState {
    version: String,
    started_at: Instant,
    engine: Arc<ReplicaEngine>,
    display_depth: usize,
}

impl HttpState {
    /// Create handler state.
    #[must_use]
    pub fn new(version: String, engine: Arc<ReplicaEngine>, display_depth: usize) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            engine,
            display_depth,
        }
    }
}

/// Build the router.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/book", get(book_handler))
        .route("/symbol/{symbol}", post(switch_handler))
        .route("/symbol", delete(unsubscribe_handler))
        .route("/retry", post(retry_handler))
        .with_state(state)
}

/// HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let replica = state.engine.current_status();
    let status = HealthStatus::from_connectivity(replica.connectivity);
    let response = HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        replica,
    };
    let code = match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if is_ready(&state.engine.current_status()) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

/// Streaming, or polling with at least one snapshot applied.
fn is_ready(status: &ReplicaStatus) -> bool {
    match status.connectivity {
        Connectivity::Streaming => true,
        Connectivity::Degraded => status.last_update.is_some(),
        _ => false,
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn book_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<BookQuery>,
) -> Json<BookResponse> {
    let depth = query
        .depth
        .unwrap_or(state.display_depth)
        .min(MAX_BOOK_DEPTH);
    let replica = state.engine.replica();
    // Revision first: the view is at least this fresh.
    let revision = replica.status().revision;
    let view = replica.view(depth);

    Json(BookResponse {
        symbol: view.symbol,
        connectivity: view.connectivity,
        bids: rows(&view.bids),
        asks: rows(&view.asks),
        best_bid: view.best_bid,
        best_ask: view.best_ask,
        spread: view.spread,
        spread_pct: view.spread_pct,
        revision,
    })
}

fn rows(levels: &TopLevels) -> Vec<LevelRow> {
    levels.iter().map(LevelRow::from).collect()
}

async fn switch_handler(
    State(state): State<Arc<HttpState>>,
    Path(symbol): Path<String>,
) -> Response {
    match state.engine.switch_to(&symbol).await {
        Ok(epoch) => {
            let symbol = state
                .engine
                .active_subscription()
                .await
                .map_or(symbol, |record| record.symbol.to_string());
            (StatusCode::OK, Json(SubscribedResponse { symbol, epoch })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn unsubscribe_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if state.engine.unsubscribe().await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn retry_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if state.engine.retry_streaming().await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    }
}

fn error_response(error: &EngineError) -> Response {
    let code = match error {
        EngineError::InvalidSymbol(_) => StatusCode::BAD_REQUEST,
        EngineError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
