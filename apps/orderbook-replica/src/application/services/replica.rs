//! Shared Replica Handle
//!
//! The one owner of the [`ReplicaState`]. Writers present the epoch of the
//! subscription they belong to; the epoch check and the mutation happen under
//! the same write guard, so a callback from a disposed subscription can never
//! touch the book after [`ReplicaHandle::begin`] or [`ReplicaHandle::release`]
//! has returned. Readers take the read guard and therefore never see a
//! half-applied snapshot.
//!
//! Every accepted mutation publishes a [`ReplicaStatus`] on a `watch` channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

use crate::application::ports::BookSnapshot;
use crate::domain::book::{Level, Side, TopLevels};
use crate::domain::replica::{BookView, Connectivity, ReplicaState};
use crate::domain::subscription::{Epoch, Symbol};
use crate::infrastructure::metrics;

/// Mutation attempted with an epoch that is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stale epoch {stale} (current {current})")]
pub struct StaleEpoch {
    /// Epoch presented by the writer.
    pub stale: Epoch,
    /// Epoch in force.
    pub current: Epoch,
}

/// Published after every accepted change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaStatus {
    /// Tracked symbol.
    pub symbol: Option<String>,
    /// Current connectivity.
    pub connectivity: Connectivity,
    /// Epoch of the active subscription.
    pub epoch: Epoch,
    /// Count of applied snapshots and deltas since the epoch began.
    pub revision: u64,
    /// When book data last changed.
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Guarded {
    epoch: Epoch,
    state: ReplicaState,
    revision: u64,
    last_update: Option<DateTime<Utc>>,
}

impl Guarded {
    fn check(&self, epoch: Epoch) -> Result<(), StaleEpoch> {
        if epoch == self.epoch {
            Ok(())
        } else {
            Err(StaleEpoch {
                stale: epoch,
                current: self.epoch,
            })
        }
    }

    fn status(&self) -> ReplicaStatus {
        ReplicaStatus {
            symbol: self.state.symbol().map(str::to_string),
            connectivity: self.state.connectivity(),
            epoch: self.epoch,
            revision: self.revision,
            last_update: self.last_update,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.last_update = Some(Utc::now());
        metrics::set_book_levels(Side::Bid, self.state.side(Side::Bid).len());
        metrics::set_book_levels(Side::Ask, self.state.side(Side::Ask).len());
    }
}

/// Cloneable handle to the replica.
#[derive(Debug, Clone)]
pub struct ReplicaHandle {
    inner: Arc<RwLock<Guarded>>,
    status_tx: Arc<watch::Sender<ReplicaStatus>>,
}

impl Default for ReplicaHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaHandle {
    /// Idle replica at [`Epoch::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        let guarded = Guarded {
            epoch: Epoch::ZERO,
            state: ReplicaState::idle(),
            revision: 0,
            last_update: None,
        };
        let (status_tx, _) = watch::channel(guarded.status());
        Self {
            inner: Arc::new(RwLock::new(guarded)),
            status_tx: Arc::new(status_tx),
        }
    }

    // -------------------------------------------------------------------------
    // Epoch control
    // -------------------------------------------------------------------------

    /// Invalidate the current epoch and start an empty replica for `symbol`.
    pub fn begin(&self, symbol: &Symbol) -> Epoch {
        let mut guard = self.inner.write();
        guard.epoch = guard.epoch.next();
        guard.state = ReplicaState::for_symbol(symbol.as_str());
        guard.revision = 0;
        guard.last_update = None;
        self.publish(&guard);
        guard.epoch
    }

    /// Invalidate the current epoch and return to idle.
    pub fn release(&self) -> Epoch {
        let mut guard = self.inner.write();
        guard.epoch = guard.epoch.next();
        guard.state = ReplicaState::idle();
        guard.revision = 0;
        guard.last_update = None;
        self.publish(&guard);
        guard.epoch
    }

    /// Epoch currently accepted by writers.
    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.inner.read().epoch
    }

    /// Whether `epoch` may still write.
    #[must_use]
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.inner.read().epoch == epoch
    }

    // -------------------------------------------------------------------------
    // Epoch-checked writes
    // -------------------------------------------------------------------------

    /// Replace both sides with `snapshot` and set `connectivity`.
    ///
    /// # Errors
    ///
    /// Returns [`StaleEpoch`] without touching the book if `epoch` is not current.
    pub fn apply_snapshot(
        &self,
        epoch: Epoch,
        snapshot: &BookSnapshot,
        connectivity: Connectivity,
    ) -> Result<(), StaleEpoch> {
        let mut guard = self.inner.write();
        guard.check(epoch)?;
        guard.state.apply_snapshot(
            snapshot.bids.iter().copied(),
            snapshot.asks.iter().copied(),
        );
        guard.state.set_connectivity(connectivity);
        guard.touch();
        self.publish(&guard);
        Ok(())
    }

    /// Patch both sides with level updates.
    ///
    /// # Errors
    ///
    /// Returns [`StaleEpoch`] without touching the book if `epoch` is not current.
    pub fn apply_delta(&self, epoch: Epoch, bids: &[Level], asks: &[Level]) -> Result<(), StaleEpoch> {
        let mut guard = self.inner.write();
        guard.check(epoch)?;
        guard
            .state
            .apply_delta(bids.iter().copied(), asks.iter().copied());
        guard.touch();
        self.publish(&guard);
        Ok(())
    }

    /// Change connectivity without touching the book.
    ///
    /// # Errors
    ///
    /// Returns [`StaleEpoch`] if `epoch` is not current.
    pub fn set_connectivity(
        &self,
        epoch: Epoch,
        connectivity: Connectivity,
    ) -> Result<(), StaleEpoch> {
        let mut guard = self.inner.write();
        guard.check(epoch)?;
        if guard.state.connectivity() != connectivity {
            guard.state.set_connectivity(connectivity);
            self.publish(&guard);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Run `f` against a consistent view of the replica.
    pub fn read<R>(&self, f: impl FnOnce(&ReplicaState) -> R) -> R {
        f(&self.inner.read().state)
    }

    /// Up to `n` bids, highest first.
    #[must_use]
    pub fn top_bids(&self, n: usize) -> TopLevels {
        self.read(|s| s.top_bids(n))
    }

    /// Up to `n` asks, lowest first.
    #[must_use]
    pub fn top_asks(&self, n: usize) -> TopLevels {
        self.read(|s| s.top_asks(n))
    }

    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<Level> {
        self.read(ReplicaState::best_bid)
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<Level> {
        self.read(ReplicaState::best_ask)
    }

    /// Ask minus bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        self.read(ReplicaState::spread)
    }

    /// Current connectivity.
    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        self.read(ReplicaState::connectivity)
    }

    /// Tracked symbol.
    #[must_use]
    pub fn symbol(&self) -> Option<String> {
        self.read(|s| s.symbol().map(str::to_string))
    }

    /// Depth-limited projection.
    #[must_use]
    pub fn view(&self, depth: usize) -> BookView {
        self.read(|s| s.view(depth))
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> ReplicaStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ReplicaStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self, guarded: &Guarded) {
        metrics::set_connectivity(guarded.state.connectivity());
        self.status_tx.send_replace(guarded.status());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn snapshot(bid: Decimal, ask: Decimal) -> BookSnapshot {
        BookSnapshot::new(
            "BTCUSDT",
            vec![Level::new(bid, dec!(1))],
            vec![Level::new(ask, dec!(1))],
        )
    }

    #[test]
    fn begin_clears_and_advances_epoch() {
        let replica = ReplicaHandle::new();
        let btc = Symbol::parse("BTCUSDT").unwrap();

        let first = replica.begin(&btc);
        replica
            .apply_snapshot(first, &snapshot(dec!(1), dec!(2)), Connectivity::SnapshotLoaded)
            .unwrap();
        assert_eq!(replica.top_bids(10).len(), 1);

        let second = replica.begin(&Symbol::parse("ETHUSDT").unwrap());
        assert!(second > first);
        assert!(replica.top_bids(10).is_empty());
        assert_eq!(replica.symbol().as_deref(), Some("ETHUSDT"));
        assert_eq!(replica.connectivity(), Connectivity::Connecting);
    }

    #[test]
    fn stale_writes_are_rejected_without_mutation() {
        let replica = ReplicaHandle::new();
        let old = replica.begin(&Symbol::parse("BTCUSDT").unwrap());
        let new = replica.begin(&Symbol::parse("ETHUSDT").unwrap());

        let err = replica
            .apply_snapshot(old, &snapshot(dec!(1), dec!(2)), Connectivity::Streaming)
            .unwrap_err();
        assert_eq!(err, StaleEpoch { stale: old, current: new });

        let err = replica
            .apply_delta(old, &[Level::new(dec!(5), dec!(5))], &[])
            .unwrap_err();
        assert_eq!(err.current, new);

        assert!(replica.set_connectivity(old, Connectivity::Failed).is_err());
        assert!(replica.top_bids(10).is_empty());
        assert_eq!(replica.connectivity(), Connectivity::Connecting);
    }

    #[test]
    fn release_returns_to_idle() {
        let replica = ReplicaHandle::new();
        let epoch = replica.begin(&Symbol::parse("BTCUSDT").unwrap());
        replica
            .apply_snapshot(epoch, &snapshot(dec!(1), dec!(2)), Connectivity::Streaming)
            .unwrap();

        replica.release();
        assert!(!replica.is_current(epoch));
        assert_eq!(replica.connectivity(), Connectivity::Idle);
        assert_eq!(replica.symbol(), None);
        assert_eq!(replica.best_bid(), None);
    }

    #[test]
    fn status_tracks_revisions() {
        let replica = ReplicaHandle::new();
        let rx = replica.watch();
        let epoch = replica.begin(&Symbol::parse("BTCUSDT").unwrap());

        replica
            .apply_snapshot(epoch, &snapshot(dec!(1), dec!(2)), Connectivity::SnapshotLoaded)
            .unwrap();
        replica
            .apply_delta(epoch, &[Level::new(dec!(1.5), dec!(3))], &[])
            .unwrap();

        let status = rx.borrow().clone();
        assert_eq!(status.revision, 2);
        assert_eq!(status.epoch, epoch);
        assert_eq!(status.connectivity, Connectivity::SnapshotLoaded);
        assert!(status.last_update.is_some());
        assert_eq!(replica.spread(), Some(dec!(0.5)));
    }

    #[test]
    fn connectivity_change_does_not_bump_revision() {
        let replica = ReplicaHandle::new();
        let epoch = replica.begin(&Symbol::parse("BTCUSDT").unwrap());
        replica.set_connectivity(epoch, Connectivity::Streaming).unwrap();

        let status = replica.status();
        assert_eq!(status.connectivity, Connectivity::Streaming);
        assert_eq!(status.revision, 0);
    }

    #[test]
    fn unchanged_connectivity_is_not_published() {
        let replica = ReplicaHandle::new();
        let epoch = replica.begin(&Symbol::parse("BTCUSDT").unwrap());
        let mut rx = replica.watch();
        let mut changed = tokio_test::task::spawn(rx.changed());
        tokio_test::assert_pending!(changed.poll());

        replica.set_connectivity(epoch, Connectivity::Connecting).unwrap();
        tokio_test::assert_pending!(changed.poll());

        replica.set_connectivity(epoch, Connectivity::Streaming).unwrap();
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
    }
}
