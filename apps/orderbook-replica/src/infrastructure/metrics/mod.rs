//! Prometheus Metrics Module
//!
//! Exposes replica metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: stream messages applied, protocol violations, stale drops
//! - **Snapshots**: snapshots applied by source and REST fetch latency
//! - **Recovery**: reconnects and fallback poll ticks
//! - **State**: connectivity and level counts per side
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port. Recording is a
//! no-op until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::book::Side;
use crate::domain::replica::Connectivity;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "book_replica_messages_total",
        "Stream book messages applied, by kind"
    );
    describe_counter!(
        "book_replica_snapshots_applied_total",
        "Full snapshots applied, by source (rest, stream, poll)"
    );
    describe_counter!(
        "book_replica_stale_messages_dropped_total",
        "Writes rejected because their subscription epoch was superseded"
    );
    describe_counter!(
        "book_replica_protocol_violations_total",
        "Stream messages dropped as unusable"
    );
    describe_counter!(
        "book_replica_reconnects_total",
        "Stream reconnects scheduled after an unplanned close"
    );
    describe_counter!(
        "book_replica_poll_ticks_total",
        "Fallback poll ticks, by outcome"
    );

    describe_gauge!(
        "book_replica_connectivity",
        "Replica connectivity (0 idle, 1 connecting, 2 snapshot_loaded, 3 streaming, 4 degraded, 5 failed)"
    );
    describe_gauge!("book_replica_levels", "Price levels held, by side");

    describe_histogram!(
        "book_replica_snapshot_fetch_seconds",
        "REST snapshot request latency"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a stream book message (`snapshot` or `delta`).
pub fn record_message(kind: &'static str) {
    counter!("book_replica_messages_total", "kind" => kind).increment(1);
}

/// Record a full snapshot applied from `source`.
pub fn record_snapshot_applied(source: &'static str) {
    counter!("book_replica_snapshots_applied_total", "source" => source).increment(1);
}

/// Record a write dropped for a superseded epoch.
pub fn record_stale_dropped() {
    counter!("book_replica_stale_messages_dropped_total").increment(1);
}

/// Record a dropped protocol violation.
pub fn record_protocol_violation() {
    counter!("book_replica_protocol_violations_total").increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("book_replica_reconnects_total").increment(1);
}

/// Record a fallback poll tick (`ok` or `error`).
pub fn record_poll_tick(outcome: &'static str) {
    counter!("book_replica_poll_ticks_total", "outcome" => outcome).increment(1);
}

/// Publish the current connectivity.
pub fn set_connectivity(connectivity: Connectivity) {
    gauge!("book_replica_connectivity").set(connectivity.as_gauge());
}

/// Publish the level count of one side.
pub fn set_book_levels(side: Side, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("book_replica_levels", "side" => side.as_str()).set(count as f64);
}

/// Record REST snapshot latency.
pub fn record_snapshot_fetch_duration(duration: Duration) {
    histogram!("book_replica_snapshot_fetch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
