//! Fallback Poller
//!
//! Keeps the replica approximately fresh while the stream is unavailable by
//! replacing the whole book with a REST snapshot on a fixed interval. A failed
//! tick leaves the previous state in place; the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::replica::ReplicaHandle;
use crate::application::ports::{BookSnapshot, SnapshotFetchError, SnapshotSource};
use crate::domain::replica::Connectivity;
use crate::domain::subscription::SubscriptionRecord;
use crate::infrastructure::metrics;

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Shortest accepted poll interval; smaller values are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Periodic snapshot refresher for one subscription.
pub struct FallbackPoller {
    record: SubscriptionRecord,
    replica: ReplicaHandle,
    snapshots: Arc<dyn SnapshotSource>,
    depth: u32,
    interval: Duration,
    cancel: CancellationToken,
}

impl FallbackPoller {
    /// Create a poller. Nothing happens until [`FallbackPoller::run`].
    ///
    /// `interval` is raised to [`MIN_POLL_INTERVAL`] if shorter.
    #[must_use]
    pub fn new(
        record: SubscriptionRecord,
        replica: ReplicaHandle,
        snapshots: Arc<dyn SnapshotSource>,
        depth: u32,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            record,
            replica,
            snapshots,
            depth,
            interval: interval.max(MIN_POLL_INTERVAL),
            cancel,
        }
    }

    /// Poll until cancelled or the epoch is superseded.
    ///
    /// The first fetch is immediate.
    pub async fn run(&self) {
        if self
            .replica
            .set_connectivity(self.record.epoch, Connectivity::Degraded)
            .is_err()
        {
            return;
        }
        debug!(
            symbol = %self.record.symbol,
            epoch = %self.record.epoch,
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Fallback polling started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let fetched = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                r = self.snapshots.fetch_snapshot(&self.record.symbol, self.depth) => r,
            };
            if !self.on_fetch(fetched) {
                break;
            }
        }

        debug!(
            symbol = %self.record.symbol,
            epoch = %self.record.epoch,
            "Fallback polling stopped"
        );
    }

    /// Returns `false` once the epoch is gone.
    fn on_fetch(&self, fetched: Result<BookSnapshot, SnapshotFetchError>) -> bool {
        let snapshot = match fetched {
            Ok(snapshot)
                if snapshot.symbol.is_empty() || snapshot.symbol == self.record.symbol.as_str() =>
            {
                snapshot
            }
            Ok(snapshot) => {
                metrics::record_poll_tick("error");
                warn!(
                    symbol = %self.record.symbol,
                    actual = %snapshot.symbol,
                    "Poll returned a snapshot for another symbol"
                );
                return true;
            }
            Err(e) => {
                metrics::record_poll_tick("error");
                warn!(
                    symbol = %self.record.symbol,
                    error = %e,
                    "Poll failed, keeping last snapshot"
                );
                return true;
            }
        };

        if self
            .replica
            .apply_snapshot(self.record.epoch, &snapshot, Connectivity::Degraded)
            .is_err()
        {
            metrics::record_stale_dropped();
            return false;
        }
        metrics::record_poll_tick("ok");
        metrics::record_snapshot_applied("poll");
        true
    }
}
