//! Feed Connection
//!
//! Drives one subscription through
//! `Idle → FetchingSnapshot → StreamOpening → Streaming → Closed`, looping
//! from `Closed` back to `FetchingSnapshot` after the reconnect delay. A
//! snapshot failure or a transport error ends the run in `Failed`; the caller
//! decides what happens next (the engine hands over to the fallback poller).
//!
//! Every write goes through the [`ReplicaHandle`] with this connection's
//! epoch. Once the epoch is superseded the first rejected write ends the run.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::replica::{ReplicaHandle, StaleEpoch};
use crate::application::ports::{
    BookSnapshot, BookUpdate, ProtocolViolation, SnapshotFetchError, SnapshotSource,
    StreamConnector, StreamRequest, TransportError, TransportEvent, UpdateKind,
};
use crate::domain::replica::Connectivity;
use crate::domain::subscription::SubscriptionRecord;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Venue adapters used by a feed.
#[derive(Clone)]
pub struct FeedDeps {
    /// One-shot snapshots.
    pub snapshots: Arc<dyn SnapshotSource>,
    /// Streaming subscriptions.
    pub connector: Arc<dyn StreamConnector>,
}

impl std::fmt::Debug for FeedDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDeps").finish_non_exhaustive()
    }
}

/// Feed tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Levels per side requested from the snapshot and the stream.
    pub snapshot_depth: u32,
    /// Delay policy after an unplanned close.
    pub reconnect: ReconnectConfig,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            snapshot_depth: 50,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Lifecycle position of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    /// Created, not started.
    Idle,
    /// Waiting for the REST snapshot.
    FetchingSnapshot,
    /// Snapshot applied, stream being opened.
    StreamOpening,
    /// Stream confirmed by its first message.
    Streaming,
    /// Stream ended; waiting to reconnect or cancelled.
    Closed,
    /// Unrecoverable for the streaming path.
    Failed,
}

impl FeedPhase {
    /// Label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingSnapshot => "fetching_snapshot",
            Self::StreamOpening => "stream_opening",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Why the streaming path gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedFailure {
    /// Snapshot could not be loaded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotFetchError),

    /// Stream could not be opened or failed while open.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Cancelled or superseded; nothing more to do.
    Cancelled,
    /// Streaming path failed; the replica is marked `Failed`.
    Failed(FeedFailure),
}

enum StreamEnd {
    Cancelled,
    Closed(Option<String>),
    Failed(TransportError),
}

/// One subscription's streaming path.
pub struct FeedConnection {
    record: SubscriptionRecord,
    replica: ReplicaHandle,
    deps: FeedDeps,
    request: StreamRequest,
    reconnect: ReconnectPolicy,
    cancel: CancellationToken,
    phase: FeedPhase,
}

impl FeedConnection {
    /// Create a feed in [`FeedPhase::Idle`].
    #[must_use]
    pub fn new(
        record: SubscriptionRecord,
        replica: ReplicaHandle,
        deps: FeedDeps,
        settings: &FeedSettings,
        cancel: CancellationToken,
    ) -> Self {
        let request = StreamRequest::new(record.symbol.clone(), settings.snapshot_depth);
        Self {
            record,
            replica,
            deps,
            request,
            reconnect: ReconnectPolicy::new(settings.reconnect.clone()),
            cancel,
            phase: FeedPhase::Idle,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> FeedPhase {
        self.phase
    }

    /// Run until cancelled, superseded or failed.
    pub async fn run(&mut self) -> FeedOutcome {
        loop {
            if let Some(outcome) = self.cycle().await {
                return outcome;
            }

            // Unplanned close: wait, then start over from the snapshot.
            self.enter(FeedPhase::Closed);
            if self
                .replica
                .set_connectivity(self.record.epoch, Connectivity::Connecting)
                .is_err()
            {
                return self.superseded();
            }
            let Some(delay) = self.reconnect.next_delay() else {
                let attempts = self.reconnect.attempt_count();
                return self.fail(TransportError::ReconnectExhausted(attempts).into());
            };
            metrics::record_reconnect();
            info!(
                symbol = %self.record.symbol,
                epoch = %self.record.epoch,
                attempt = self.reconnect.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling stream reconnect"
            );
            let slept = tokio::select! {
                () = self.cancel.cancelled() => false,
                () = tokio::time::sleep(delay) => true,
            };
            if !slept {
                return self.cancelled();
            }
        }
    }

    /// One pass from snapshot to stream end. `None` means an unplanned close.
    async fn cycle(&mut self) -> Option<FeedOutcome> {
        self.enter(FeedPhase::FetchingSnapshot);
        let fetched = tokio::select! {
            () = self.cancel.cancelled() => None,
            r = self.deps.snapshots.fetch_snapshot(&self.record.symbol, self.request.depth) => Some(r),
        };
        let Some(fetched) = fetched else {
            return Some(self.cancelled());
        };
        let snapshot = match fetched.and_then(|s| self.check_symbol(s)) {
            Ok(snapshot) => snapshot,
            Err(e) => return Some(self.fail(e.into())),
        };
        if self
            .replica
            .apply_snapshot(self.record.epoch, &snapshot, Connectivity::SnapshotLoaded)
            .is_err()
        {
            return Some(self.superseded());
        }
        metrics::record_snapshot_applied("rest");
        debug!(
            symbol = %self.record.symbol,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Snapshot applied"
        );

        self.enter(FeedPhase::StreamOpening);
        // Dropping the guard closes the transport however this pass ends.
        let transport = self.cancel.child_token();
        let _transport_guard = transport.clone().drop_guard();
        let opened = tokio::select! {
            () = self.cancel.cancelled() => None,
            r = self.deps.connector.open(&self.request, transport) => Some(r),
        };
        let events = match opened {
            None => return Some(self.cancelled()),
            Some(Ok(rx)) => rx,
            Some(Err(e)) => return Some(self.fail(e.into())),
        };

        match self.pump(events).await {
            StreamEnd::Cancelled => Some(self.cancelled()),
            StreamEnd::Failed(e) => Some(self.fail(e.into())),
            StreamEnd::Closed(reason) => {
                info!(
                    symbol = %self.record.symbol,
                    epoch = %self.record.epoch,
                    reason = reason.as_deref().unwrap_or("none"),
                    "Stream closed"
                );
                None
            }
        }
    }

    async fn pump(&mut self, mut events: mpsc::Receiver<TransportEvent>) -> StreamEnd {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return StreamEnd::Cancelled,
                ev = events.recv() => ev,
            };
            let Some(event) = event else {
                return StreamEnd::Closed(Some("event channel closed".to_string()));
            };

            let applied = match event {
                TransportEvent::Subscribed => self.confirm_streaming(),
                TransportEvent::Book(update) => self.on_book(update),
                TransportEvent::Violation(violation) => {
                    self.on_violation(&violation);
                    Ok(())
                }
                TransportEvent::Closed { reason } => return StreamEnd::Closed(reason),
                TransportEvent::Error(e) => return StreamEnd::Failed(e),
            };
            if applied.is_err() {
                metrics::record_stale_dropped();
                return StreamEnd::Cancelled;
            }
        }
    }

    fn on_book(&mut self, update: BookUpdate) -> Result<(), StaleEpoch> {
        if update.symbol != self.record.symbol.as_str() {
            self.on_violation(&ProtocolViolation::WrongSymbol {
                expected: self.record.symbol.to_string(),
                actual: update.symbol,
            });
            return Ok(());
        }
        self.confirm_streaming()?;

        let epoch = self.record.epoch;
        match update.kind {
            UpdateKind::Snapshot => {
                metrics::record_message("snapshot");
                let snapshot = BookSnapshot::new(update.symbol, update.bids, update.asks);
                self.replica
                    .apply_snapshot(epoch, &snapshot, Connectivity::Streaming)?;
                metrics::record_snapshot_applied("stream");
            }
            UpdateKind::Delta => {
                metrics::record_message("delta");
                self.replica.apply_delta(epoch, &update.bids, &update.asks)?;
            }
        }
        Ok(())
    }

    fn on_violation(&self, violation: &ProtocolViolation) {
        metrics::record_protocol_violation();
        warn!(
            symbol = %self.record.symbol,
            epoch = %self.record.epoch,
            error = %violation,
            "Dropping unusable stream message"
        );
    }

    fn confirm_streaming(&mut self) -> Result<(), StaleEpoch> {
        if self.phase == FeedPhase::Streaming {
            return Ok(());
        }
        self.replica
            .set_connectivity(self.record.epoch, Connectivity::Streaming)?;
        self.enter(FeedPhase::Streaming);
        self.reconnect.reset();
        Ok(())
    }

    fn check_symbol(&self, snapshot: BookSnapshot) -> Result<BookSnapshot, SnapshotFetchError> {
        if snapshot.symbol.is_empty() || snapshot.symbol == self.record.symbol.as_str() {
            Ok(snapshot)
        } else {
            Err(SnapshotFetchError::SymbolMismatch {
                expected: self.record.symbol.to_string(),
                actual: snapshot.symbol,
            })
        }
    }

    fn enter(&mut self, phase: FeedPhase) {
        if self.phase != phase {
            debug!(
                symbol = %self.record.symbol,
                epoch = %self.record.epoch,
                from = self.phase.as_str(),
                to = phase.as_str(),
                "Feed phase change"
            );
            self.phase = phase;
        }
    }

    fn fail(&mut self, failure: FeedFailure) -> FeedOutcome {
        self.enter(FeedPhase::Failed);
        if self
            .replica
            .set_connectivity(self.record.epoch, Connectivity::Failed)
            .is_err()
        {
            return self.superseded();
        }
        warn!(
            symbol = %self.record.symbol,
            epoch = %self.record.epoch,
            error = %failure,
            "Streaming path failed"
        );
        FeedOutcome::Failed(failure)
    }

    fn cancelled(&mut self) -> FeedOutcome {
        self.enter(FeedPhase::Closed);
        FeedOutcome::Cancelled
    }

    fn superseded(&mut self) -> FeedOutcome {
        debug!(
            symbol = %self.record.symbol,
            epoch = %self.record.epoch,
            "Epoch superseded, stopping feed"
        );
        self.cancelled()
    }
}

// =============================================================================
// Tests
// =============================================================================
