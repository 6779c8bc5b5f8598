//! Replica Engine Integration Tests
//!
//! Drives `ReplicaEngine` end to end through scripted in-memory venue
//! adapters: snapshot seeding, delta streaming, symbol switches, reconnects
//! and the degrade/recover cycle.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use orderbook_replica::{
    BookSnapshot, BookUpdate, Connectivity, EngineSettings, FeedDeps, FeedSettings, Level,
    ReconnectConfig, ReplicaEngine, ReplicaHandle, ReplicaStatus, SnapshotFetchError,
    SnapshotSource, StreamConnector, StreamRequest, Symbol, TransportError, TransportEvent,
    UpdateKind,
};

// =============================================================================
// Scripted Adapters
// =============================================================================

/// Queued snapshot responses; the last one repeats.
#[derive(Default)]
struct ScriptedSnapshots {
    responses: Mutex<VecDeque<Result<BookSnapshot, SnapshotFetchError>>>,
    symbols: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedSnapshots {
    fn push(&self, response: Result<BookSnapshot, SnapshotFetchError>) {
        self.responses.lock().push_back(response);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.lock().clone()
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshots {
    async fn fetch_snapshot(
        &self,
        symbol: &Symbol,
        _depth: u32,
    ) -> Result<BookSnapshot, SnapshotFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.symbols.lock().push(symbol.to_string());
        let mut responses = self.responses.lock();
        if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses
                .front()
                .cloned()
                .unwrap_or(Err(SnapshotFetchError::Http("nothing scripted".into())))
        }
    }
}

/// Pre-built event channels or open failures, one per `open`.
#[derive(Default)]
struct ScriptedConnector {
    opens: Mutex<VecDeque<Result<mpsc::Receiver<TransportEvent>, TransportError>>>,
    requests: Mutex<Vec<StreamRequest>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedConnector {
    fn push_stream(&self) -> mpsc::Sender<TransportEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.opens.lock().push_back(Ok(rx));
        tx
    }

    fn push_error(&self, error: TransportError) {
        self.opens.lock().push_back(Err(error));
    }

    fn open_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn transport_tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn open(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.requests.lock().push(request.clone());
        self.tokens.lock().push(cancel);
        self.opens
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect("nothing scripted".into())))
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    engine: ReplicaEngine,
    snapshots: Arc<ScriptedSnapshots>,
    connector: Arc<ScriptedConnector>,
}

fn harness() -> Harness {
    let snapshots = Arc::new(ScriptedSnapshots::default());
    let connector = Arc::new(ScriptedConnector::default());
    let deps = FeedDeps {
        snapshots: snapshots.clone(),
        connector: connector.clone(),
    };
    let settings = EngineSettings {
        feed: FeedSettings {
            snapshot_depth: 50,
            reconnect: ReconnectConfig::fixed(Duration::from_millis(20)),
        },
        poll_interval: Duration::from_millis(50),
        ..EngineSettings::default()
    };
    Harness {
        engine: ReplicaEngine::new(deps, settings),
        snapshots,
        connector,
    }
}

fn levels(pairs: &[(&str, &str)]) -> Vec<Level> {
    pairs
        .iter()
        .map(|(p, q)| Level::new(Decimal::from_str(p).unwrap(), Decimal::from_str(q).unwrap()))
        .collect()
}

fn snapshot(symbol: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> BookSnapshot {
    BookSnapshot::new(symbol, levels(bids), levels(asks))
}

fn delta(symbol: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> TransportEvent {
    TransportEvent::Book(BookUpdate {
        symbol: symbol.to_string(),
        kind: UpdateKind::Delta,
        bids: levels(bids),
        asks: levels(asks),
    })
}

async fn wait_for(replica: &ReplicaHandle, f: impl Fn(&ReplicaStatus) -> bool) -> ReplicaStatus {
    let mut rx = replica.watch();
    timeout(Duration::from_secs(5), rx.wait_for(|s| f(s)))
        .await
        .expect("timed out waiting for replica status")
        .expect("status channel closed")
        .clone()
}

async fn wait_for_connectivity(replica: &ReplicaHandle, connectivity: Connectivity) -> ReplicaStatus {
    wait_for(replica, |s| s.connectivity == connectivity).await
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_snapshot_then_delta_scenario() {
    let h = harness();
    h.snapshots.push(Ok(snapshot(
        "BTCUSDT",
        &[("100.00", "2"), ("99.50", "1")],
        &[("100.50", "3")],
    )));
    let tx = h.connector.push_stream();

    h.engine.subscribe("BTCUSDT").await.unwrap();
    let replica = h.engine.replica();
    wait_for_connectivity(replica, Connectivity::SnapshotLoaded).await;

    tx.send(TransportEvent::Subscribed).await.unwrap();
    let streaming = wait_for_connectivity(replica, Connectivity::Streaming).await;

    tx.send(delta("BTCUSDT", &[("100.00", "0"), ("99.00", "5")], &[]))
        .await
        .unwrap();
    wait_for(replica, |s| s.revision > streaming.revision).await;

    assert_eq!(
        replica.top_bids(2).into_vec(),
        levels(&[("99.50", "1"), ("99.00", "5")])
    );
    assert_eq!(replica.best_ask().map(|l| l.price), Some(dec!(100.50)));
    assert_eq!(replica.spread(), Some(dec!(1.00)));
    assert_eq!(h.engine.current_status().symbol.as_deref(), Some("BTCUSDT"));

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_switch_discards_late_message_from_previous_symbol() {
    let h = harness();
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("100", "1")], &[("101", "1")])));
    h.snapshots.push(Ok(snapshot("ETHUSDT", &[("10", "4")], &[("11", "4")])));
    let btc_tx = h.connector.push_stream();
    let eth_tx = h.connector.push_stream();
    let replica = h.engine.replica().clone();

    let btc_epoch = h.engine.subscribe("BTCUSDT").await.unwrap();
    btc_tx.send(TransportEvent::Subscribed).await.unwrap();
    wait_for_connectivity(&replica, Connectivity::Streaming).await;

    let eth_epoch = h.engine.switch_to("ETHUSDT").await.unwrap();
    assert!(eth_epoch > btc_epoch);

    // The previous feed has been joined, so its transport is gone.
    assert!(btc_tx.send(delta("BTCUSDT", &[("100", "9")], &[])).await.is_err());
    // A trailing write carrying the old epoch is refused.
    assert!(replica.apply_delta(btc_epoch, &levels(&[("100", "9")]), &[]).is_err());

    eth_tx.send(TransportEvent::Subscribed).await.unwrap();
    wait_for(&replica, |s| {
        s.epoch == eth_epoch && s.connectivity == Connectivity::Streaming
    })
    .await;

    assert_eq!(replica.symbol().as_deref(), Some("ETHUSDT"));
    assert_eq!(replica.top_bids(10).into_vec(), levels(&[("10", "4")]));
    assert_eq!(replica.best_bid().map(|l| l.price), Some(dec!(10)));
    assert_eq!(h.snapshots.symbols(), vec!["BTCUSDT", "ETHUSDT"]);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_transport_error_degrades_then_retry_recovers() {
    let h = harness();
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("100", "1")], &[("101", "1")])));
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("98", "7")], &[("99", "7")])));
    let first = h.connector.push_stream();
    let replica = h.engine.replica().clone();

    h.engine.subscribe("BTCUSDT").await.unwrap();
    first.send(TransportEvent::Subscribed).await.unwrap();
    wait_for_connectivity(&replica, Connectivity::Streaming).await;

    first
        .send(TransportEvent::Error(TransportError::WebSocket("reset".into())))
        .await
        .unwrap();
    wait_for(&replica, |s| {
        s.connectivity == Connectivity::Degraded && s.revision >= 2
    })
    .await;

    // The poll replaced the book with the latest snapshot wholesale.
    assert_eq!(replica.top_bids(10).into_vec(), levels(&[("98", "7")]));
    assert_eq!(replica.top_asks(10).into_vec(), levels(&[("99", "7")]));
    assert_eq!(h.connector.open_count(), 1);

    let second = h.connector.push_stream();
    assert!(h.engine.retry_streaming().await);
    wait_for_connectivity(&replica, Connectivity::SnapshotLoaded).await;
    second.send(TransportEvent::Subscribed).await.unwrap();
    wait_for_connectivity(&replica, Connectivity::Streaming).await;

    assert_eq!(h.connector.open_count(), 2);
    assert!(h.connector.transport_tokens()[0].is_cancelled());
    assert!(!h.engine.retry_streaming().await);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_repeated_retry_requests_make_one_attempt() {
    let h = harness();
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("100", "1")], &[("101", "1")])));
    let first = h.connector.push_stream();
    let replica = h.engine.replica().clone();

    h.engine.subscribe("BTCUSDT").await.unwrap();
    first.send(TransportEvent::Subscribed).await.unwrap();
    wait_for_connectivity(&replica, Connectivity::Streaming).await;
    first
        .send(TransportEvent::Error(TransportError::WebSocket("reset".into())))
        .await
        .unwrap();
    wait_for(&replica, |s| {
        s.connectivity == Connectivity::Degraded && s.revision >= 2
    })
    .await;

    h.connector.push_error(TransportError::Connect("refused".into()));
    let (a, b) = tokio::join!(h.engine.retry_streaming(), h.engine.retry_streaming());
    assert_eq!((a, b), (true, false));

    timeout(Duration::from_secs(5), async {
        while h.connector.open_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("retry never reopened the stream");
    wait_for_connectivity(&replica, Connectivity::Degraded).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The failed retry falls back to polling instead of trying again.
    assert_eq!(h.connector.open_count(), 2);
    assert_eq!(replica.connectivity(), Connectivity::Degraded);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_initial_snapshot_failure_falls_back_to_polling() {
    let h = harness();
    h.snapshots.push(Err(SnapshotFetchError::Status(503)));
    h.snapshots.push(Err(SnapshotFetchError::Status(503)));
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("50", "1")], &[("51", "1")])));
    let replica = h.engine.replica().clone();

    h.engine.subscribe("BTCUSDT").await.unwrap();

    let status = wait_for(&replica, |s| {
        s.connectivity == Connectivity::Degraded && s.last_update.is_some()
    })
    .await;

    assert_eq!(status.symbol.as_deref(), Some("BTCUSDT"));
    assert_eq!(replica.best_bid().map(|l| l.price), Some(dec!(50)));
    assert_eq!(h.connector.open_count(), 0);
    assert!(h.snapshots.calls() >= 3);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_unplanned_close_reconnects_with_fresh_snapshot() {
    let h = harness();
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("100", "1")], &[("101", "1")])));
    let first = h.connector.push_stream();
    let second = h.connector.push_stream();
    let replica = h.engine.replica().clone();

    h.engine.subscribe("BTCUSDT").await.unwrap();
    first.send(TransportEvent::Subscribed).await.unwrap();
    let streaming = wait_for_connectivity(&replica, Connectivity::Streaming).await;
    first.send(delta("BTCUSDT", &[("99", "3")], &[])).await.unwrap();
    wait_for(&replica, |s| s.revision > streaming.revision).await;
    assert_eq!(replica.top_bids(10).len(), 2);

    first
        .send(TransportEvent::Closed {
            reason: Some("server restart".into()),
        })
        .await
        .unwrap();
    second.send(TransportEvent::Subscribed).await.unwrap();
    wait_for(&replica, |s| {
        s.connectivity == Connectivity::Streaming && s.revision > streaming.revision + 1
    })
    .await;

    // The resync snapshot wiped the pre-close delta.
    assert_eq!(replica.top_bids(10).into_vec(), levels(&[("100", "1")]));
    assert_eq!(h.connector.open_count(), 2);
    assert_eq!(h.snapshots.calls(), 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_wrong_symbol_message_is_dropped() {
    let h = harness();
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("100", "1")], &[("101", "1")])));
    let tx = h.connector.push_stream();
    let replica = h.engine.replica().clone();

    h.engine.subscribe("BTCUSDT").await.unwrap();
    tx.send(TransportEvent::Subscribed).await.unwrap();
    let streaming = wait_for_connectivity(&replica, Connectivity::Streaming).await;

    tx.send(delta("ETHUSDT", &[("100", "0"), ("5", "5")], &[]))
        .await
        .unwrap();
    tx.send(delta("BTCUSDT", &[], &[("102", "2")])).await.unwrap();
    let status = wait_for(&replica, |s| s.revision > streaming.revision).await;

    assert_eq!(status.revision, streaming.revision + 1);
    assert_eq!(status.connectivity, Connectivity::Streaming);
    assert_eq!(replica.top_bids(10).into_vec(), levels(&[("100", "1")]));
    assert_eq!(replica.top_asks(10).len(), 2);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_returns_replica_to_idle() {
    let h = harness();
    h.snapshots.push(Ok(snapshot("BTCUSDT", &[("100", "1")], &[("101", "1")])));
    let tx = h.connector.push_stream();
    let replica = h.engine.replica().clone();

    let epoch = h.engine.subscribe("BTCUSDT").await.unwrap();
    tx.send(TransportEvent::Subscribed).await.unwrap();
    wait_for_connectivity(&replica, Connectivity::Streaming).await;

    assert!(h.engine.unsubscribe().await);

    let status = h.engine.current_status();
    assert_eq!(status.connectivity, Connectivity::Idle);
    assert!(status.symbol.is_none());
    assert!(status.epoch > epoch);
    assert!(replica.top_bids(10).is_empty());
    assert!(replica.spread().is_none());
    assert!(h.engine.active_subscription().await.is_none());
    assert!(!h.engine.unsubscribe().await);
}
