//! Replica Engine
//!
//! Owns the replica and at most one live subscription. Symbol changes are
//! serialised behind an async mutex and always run in this order:
//!
//! 1. cancel the running subscription and invalidate its epoch
//! 2. wait for its task to finish (abort after the grace period)
//! 3. clear the replica and start the new subscription from `Idle`
//!
//! A subscription task runs the feed connection; when the streaming path
//! fails it runs the fallback poller until the subscription is cancelled or a
//! streaming retry is requested.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use super::feed::{FeedConnection, FeedDeps, FeedOutcome, FeedSettings};
use super::poller::{DEFAULT_POLL_INTERVAL, FallbackPoller};
use super::replica::{ReplicaHandle, ReplicaStatus};
use crate::domain::replica::Connectivity;
use crate::domain::subscription::{Epoch, Symbol, SymbolError, SubscriptionRecord};

// =============================================================================
// Settings
// =============================================================================

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Snapshot depth and reconnect policy.
    pub feed: FeedSettings,
    /// Time between fallback polls.
    pub poll_interval: Duration,
    /// Automatic streaming retry while degraded. `None` waits for
    /// [`ReplicaEngine::retry_streaming`].
    pub degraded_retry_interval: Option<Duration>,
    /// How long a cancelled subscription task may take to exit before it is
    /// aborted.
    pub shutdown_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            feed: FeedSettings::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            degraded_retry_interval: None,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// Control surface error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Symbol failed validation.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    /// Engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,
}

// =============================================================================
// Engine
// =============================================================================

struct ActiveSubscription {
    record: SubscriptionRecord,
    cancel: CancellationToken,
    retry: Arc<Notify>,
    degraded: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Symbol switch controller and host-facing control surface.
pub struct ReplicaEngine {
    replica: ReplicaHandle,
    deps: FeedDeps,
    settings: EngineSettings,
    active: Mutex<Option<ActiveSubscription>>,
    root: CancellationToken,
}

impl ReplicaEngine {
    /// Create an idle engine with a fresh replica.
    #[must_use]
    pub fn new(deps: FeedDeps, settings: EngineSettings) -> Self {
        Self::with_replica(ReplicaHandle::new(), deps, settings)
    }

    /// Create an idle engine around an existing replica handle.
    #[must_use]
    pub fn with_replica(replica: ReplicaHandle, deps: FeedDeps, settings: EngineSettings) -> Self {
        Self {
            replica,
            deps,
            settings,
            active: Mutex::new(None),
            root: CancellationToken::new(),
        }
    }

    /// Read access for projections and status watchers.
    #[must_use]
    pub const fn replica(&self) -> &ReplicaHandle {
        &self.replica
    }

    /// Engine tuning.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Start tracking `symbol`. Same as [`ReplicaEngine::switch_to`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSymbol`] or [`EngineError::ShutDown`].
    pub async fn subscribe(&self, symbol: &str) -> Result<Epoch, EngineError> {
        self.switch_to(symbol).await
    }

    /// Tear down the current subscription, clear the replica and start
    /// tracking `symbol`.
    ///
    /// Switching to the symbol already tracked leaves the live subscription
    /// alone and returns its epoch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSymbol`] or [`EngineError::ShutDown`].
    pub async fn switch_to(&self, symbol: &str) -> Result<Epoch, EngineError> {
        let symbol = Symbol::parse(symbol)?;
        let mut active = self.active.lock().await;
        if self.root.is_cancelled() {
            return Err(EngineError::ShutDown);
        }

        if let Some(current) = active.as_ref() {
            if current.record.symbol == symbol && !current.task.is_finished() {
                return Ok(current.record.epoch);
            }
        }

        if let Some(previous) = active.take() {
            self.teardown(previous).await;
        }

        let epoch = self.replica.begin(&symbol);
        let record = SubscriptionRecord::new(symbol, epoch);
        info!(symbol = %record.symbol, epoch = %epoch, "Subscription started");
        *active = Some(self.spawn_session(record));
        Ok(epoch)
    }

    /// Stop tracking and return the replica to `Idle`.
    ///
    /// Returns whether a subscription was active.
    pub async fn unsubscribe(&self) -> bool {
        let mut active = self.active.lock().await;
        let Some(previous) = active.take() else {
            return false;
        };
        self.teardown(previous).await;
        true
    }

    /// Latest replica status.
    #[must_use]
    pub fn current_status(&self) -> ReplicaStatus {
        self.replica.status()
    }

    /// Record of the live subscription, if any.
    pub async fn active_subscription(&self) -> Option<SubscriptionRecord> {
        self.active.lock().await.as_ref().map(|a| a.record.clone())
    }

    /// Leave fallback polling and retry the streaming path.
    ///
    /// Returns `false` when no subscription is currently degraded. Only the
    /// first request of a degraded period is accepted.
    pub async fn retry_streaming(&self) -> bool {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(current) if current.degraded.swap(false, Ordering::SeqCst) => {
                info!(
                    symbol = %current.record.symbol,
                    epoch = %current.record.epoch,
                    "Streaming retry requested"
                );
                current.retry.notify_waiters();
                true
            }
            _ => false,
        }
    }

    /// Unsubscribe and refuse further subscriptions.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        self.root.cancel();
        if let Some(previous) = active.take() {
            self.teardown(previous).await;
        }
        info!("Replica engine shut down");
    }

    async fn teardown(&self, mut previous: ActiveSubscription) {
        previous.cancel.cancel();
        self.replica.release();

        if tokio::time::timeout(self.settings.shutdown_grace, &mut previous.task)
            .await
            .is_err()
        {
            warn!(
                symbol = %previous.record.symbol,
                epoch = %previous.record.epoch,
                "Subscription task did not stop in time, aborting"
            );
            previous.task.abort();
        }
        info!(
            symbol = %previous.record.symbol,
            epoch = %previous.record.epoch,
            "Subscription stopped"
        );
    }

    fn spawn_session(&self, record: SubscriptionRecord) -> ActiveSubscription {
        let cancel = self.root.child_token();
        let retry = Arc::new(Notify::new());
        let degraded = Arc::new(AtomicBool::new(false));
        let session = Session {
            record: record.clone(),
            replica: self.replica.clone(),
            deps: self.deps.clone(),
            settings: self.settings.clone(),
            cancel: cancel.clone(),
            retry: Arc::clone(&retry),
            degraded: Arc::clone(&degraded),
        };
        let span = info_span!("subscription", symbol = %record.symbol, epoch = %record.epoch);
        let task = tokio::spawn(session.run().instrument(span));

        ActiveSubscription {
            record,
            cancel,
            retry,
            degraded,
            task,
        }
    }
}

impl Drop for ReplicaEngine {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

// =============================================================================
// Subscription Task
// =============================================================================

struct Session {
    record: SubscriptionRecord,
    replica: ReplicaHandle,
    deps: FeedDeps,
    settings: EngineSettings,
    cancel: CancellationToken,
    retry: Arc<Notify>,
    degraded: Arc<AtomicBool>,
}

impl Session {
    async fn run(self) {
        loop {
            let mut feed = FeedConnection::new(
                self.record.clone(),
                self.replica.clone(),
                self.deps.clone(),
                &self.settings.feed,
                self.cancel.clone(),
            );
            if feed.run().await == FeedOutcome::Cancelled {
                return;
            }

            if !self.poll_until_retry().await {
                return;
            }
            if self
                .replica
                .set_connectivity(self.record.epoch, Connectivity::Connecting)
                .is_err()
            {
                return;
            }
            info!("Retrying streaming path");
        }
    }

    /// Poll until a retry is due. Returns `false` if the subscription ended.
    async fn poll_until_retry(&self) -> bool {
        let poller = FallbackPoller::new(
            self.record.clone(),
            self.replica.clone(),
            Arc::clone(&self.deps.snapshots),
            self.settings.feed.snapshot_depth,
            self.settings.poll_interval,
            self.cancel.clone(),
        );

        // Registered before the flag is raised, so a request is never missed
        // and no permit outlives this episode.
        let requested = self.retry.notified();
        tokio::pin!(requested);
        requested.as_mut().enable();

        self.degraded.store(true, Ordering::SeqCst);
        let retry = tokio::select! {
            () = poller.run() => false,
            () = requested => true,
            () = auto_retry(self.settings.degraded_retry_interval) => true,
        };
        self.degraded.store(false, Ordering::SeqCst);

        retry && !self.cancel.is_cancelled() && self.replica.is_current(self.record.epoch)
    }
}

async fn auto_retry(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}
