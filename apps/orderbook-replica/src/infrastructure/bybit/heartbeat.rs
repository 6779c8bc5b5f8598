//! Heartbeat Monitor
//!
//! Bybit closes public connections that stay silent, so the stream sends an
//! application-level `{"op":"ping"}` on a fixed interval. If no pong arrives
//! within the timeout after a ping, the monitor reports the connection dead
//! and the stream treats it as an unplanned close.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Ping cadence and pong deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub ping_interval: Duration,
    /// How long a ping may go unanswered.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

/// What the connection should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Write a ping frame.
    SendPing,
    /// Outstanding ping went unanswered.
    Timeout {
        /// Time since the unanswered ping.
        elapsed: Duration,
    },
}

/// Ping bookkeeping shared by the monitor and the read loop.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    ping_sent_at: Mutex<Option<Instant>>,
}

impl HeartbeatState {
    /// Fresh state with no outstanding ping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A ping was written.
    pub fn mark_ping_sent(&self) {
        let mut sent = self.ping_sent_at.lock();
        if sent.is_none() {
            *sent = Some(Instant::now());
        }
    }

    /// Any inbound traffic proves the connection is alive.
    pub fn record_pong(&self) {
        *self.ping_sent_at.lock() = None;
    }

    /// Age of the outstanding ping, if any.
    #[must_use]
    pub fn outstanding(&self) -> Option<Duration> {
        self.ping_sent_at.lock().map(|at| at.elapsed())
    }
}

/// Emits [`HeartbeatEvent`]s until cancelled or a timeout fires.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the monitor loop.
    pub async fn run(self) {
        // Check often enough that a timeout is noticed close to its deadline.
        let check_every = self.config.ping_interval.min(self.config.pong_timeout) / 2;
        let mut checks = tokio::time::interval(check_every.max(Duration::from_millis(10)));
        checks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_ping = Instant::now() + self.config.ping_interval;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    return;
                }
                _ = checks.tick() => {}
            }

            if let Some(elapsed) = self.state.outstanding() {
                if elapsed > self.config.pong_timeout {
                    tracing::warn!(
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        timeout_ms = u64::try_from(self.config.pong_timeout.as_millis()).unwrap_or(u64::MAX),
                        "Heartbeat timeout"
                    );
                    let _ = self.event_tx.send(HeartbeatEvent::Timeout { elapsed }).await;
                    return;
                }
            }

            if Instant::now() >= next_ping {
                next_ping = Instant::now() + self.config.ping_interval;
                if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                    return;
                }
            }
        }
    }
}
