//! Bybit Adapter Integration Tests
//!
//! The REST snapshot client against a `wiremock` server and the WebSocket
//! connector against a local `tokio-tungstenite` server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use orderbook_replica::{
    BybitRestClient, BybitStreamConnector, Level, RestClientConfig, SnapshotFetchError,
    SnapshotSource, StreamClientConfig, StreamConnector, StreamRequest, Symbol, TransportError,
    TransportEvent, UpdateKind,
};

// =============================================================================
// REST Snapshot Client
// =============================================================================

async fn rest_client(server: &MockServer) -> BybitRestClient {
    BybitRestClient::new(RestClientConfig {
        base_url: server.uri(),
        ..RestClientConfig::default()
    })
    .unwrap()
}

fn btc() -> Symbol {
    Symbol::parse("BTCUSDT").unwrap()
}

async fn mount(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/v5/market/orderbook"))
        .and(query_param("category", "spot"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("limit", "50"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_snapshot_fetch_parses_levels() {
    let server = MockServer::start().await;
    mount(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "s": "BTCUSDT",
                "b": [["65485.47", "47.081829"], ["65485", "0.001"]],
                "a": [["65557.7", "16.606555"]],
                "ts": 1_716_863_719_031_i64,
                "u": 230_704
            },
            "time": 1_716_863_719_382_i64
        })),
    )
    .await;

    let snapshot = rest_client(&server)
        .await
        .fetch_snapshot(&btc(), 50)
        .await
        .unwrap();

    assert_eq!(snapshot.symbol, "BTCUSDT");
    assert_eq!(
        snapshot.bids,
        vec![
            Level::new(dec!(65485.47), dec!(47.081829)),
            Level::new(dec!(65485), dec!(0.001)),
        ]
    );
    assert_eq!(snapshot.asks, vec![Level::new(dec!(65557.7), dec!(16.606555))]);
}

#[tokio::test]
async fn test_snapshot_fetch_reports_http_status() {
    let server = MockServer::start().await;
    mount(&server, ResponseTemplate::new(500)).await;

    let err = rest_client(&server)
        .await
        .fetch_snapshot(&btc(), 50)
        .await
        .unwrap_err();

    assert_eq!(err, SnapshotFetchError::Status(500));
}

#[tokio::test]
async fn test_snapshot_fetch_reports_venue_error() {
    let server = MockServer::start().await;
    mount(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "retCode": 10001,
            "retMsg": "params error: symbol invalid",
            "result": {},
            "time": 1_716_863_719_382_i64
        })),
    )
    .await;

    let err = rest_client(&server)
        .await
        .fetch_snapshot(&btc(), 50)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SnapshotFetchError::Venue {
            code: 10001,
            message: "params error: symbol invalid".to_string(),
        }
    );
}

#[tokio::test]
async fn test_snapshot_fetch_rejects_bad_body() {
    let server = MockServer::start().await;
    mount(&server, ResponseTemplate::new(200).set_body_string("<html>busy</html>")).await;

    let err = rest_client(&server)
        .await
        .fetch_snapshot(&btc(), 50)
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotFetchError::Decode(_)));
}

#[tokio::test]
async fn test_snapshot_fetch_rejects_bad_level() {
    let server = MockServer::start().await;
    mount(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {"s": "BTCUSDT", "b": [["abc", "1"]], "a": []}
        })),
    )
    .await;

    let err = rest_client(&server)
        .await
        .fetch_snapshot(&btc(), 50)
        .await
        .unwrap_err();

    assert!(matches!(err, SnapshotFetchError::InvalidLevel(_)));
}

// =============================================================================
// WebSocket Connector
// =============================================================================

/// What the local server does after reading the subscribe frame.
enum Script {
    /// Ack, push one snapshot, then close with a reason.
    AckBookClose,
    /// Refuse the topic.
    Reject,
    /// Ack and wait for the client to close.
    AckAndWait,
}

/// Accept one connection, report the subscribe frame, play `script`, and
/// report whether the client sent a close frame.
async fn start_venue(
    script: Script,
) -> (SocketAddr, oneshot::Receiver<Value>, oneshot::Receiver<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (subscribe_tx, subscribe_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let subscribe = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(&text).unwrap(),
                Some(Ok(_)) => {}
                other => panic!("connection ended before subscribe: {other:?}"),
            }
        };
        let _ = subscribe_tx.send(subscribe);

        match script {
            Script::AckBookClose => {
                let ack = json!({"success": true, "ret_msg": "", "conn_id": "c1", "op": "subscribe"});
                ws.send(Message::Text(ack.to_string().into())).await.unwrap();
                let book = json!({
                    "topic": "orderbook.50.BTCUSDT",
                    "type": "snapshot",
                    "ts": 1_672_304_484_978_i64,
                    "data": {"s": "BTCUSDT", "b": [["16493.50", "0.006"]], "a": [["16611.00", "0.029"]], "u": 1, "seq": 7}
                });
                ws.send(Message::Text(book.to_string().into())).await.unwrap();
                ws.send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "maintenance".into(),
                })))
                .await
                .unwrap();
            }
            Script::Reject => {
                let nack = json!({"success": false, "ret_msg": "error:handler not found", "op": "subscribe"});
                ws.send(Message::Text(nack.to_string().into())).await.unwrap();
            }
            Script::AckAndWait => {
                let ack = json!({"success": true, "ret_msg": "", "conn_id": "c1", "op": "subscribe"});
                ws.send(Message::Text(ack.to_string().into())).await.unwrap();
            }
        }

        let mut saw_close = false;
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Close(_)) => {
                    saw_close = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = closed_tx.send(saw_close);
    });

    (addr, subscribe_rx, closed_rx)
}

fn connector(addr: SocketAddr) -> BybitStreamConnector {
    BybitStreamConnector::new(StreamClientConfig {
        url: format!("ws://{addr}"),
        ..StreamClientConfig::default()
    })
}

async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_stream_subscribes_forwards_and_reports_close() {
    let (addr, subscribe_rx, _closed_rx) = start_venue(Script::AckBookClose).await;
    let request = StreamRequest::new(btc(), 50);

    let mut events = connector(addr)
        .open(&request, CancellationToken::new())
        .await
        .unwrap();

    let subscribe = subscribe_rx.await.unwrap();
    assert_eq!(subscribe, json!({"op": "subscribe", "args": ["orderbook.50.BTCUSDT"]}));

    assert!(matches!(next_event(&mut events).await, TransportEvent::Subscribed));

    let TransportEvent::Book(update) = next_event(&mut events).await else {
        panic!("expected book update");
    };
    assert_eq!(update.symbol, "BTCUSDT");
    assert_eq!(update.kind, UpdateKind::Snapshot);
    assert_eq!(update.bids, vec![Level::new(dec!(16493.50), dec!(0.006))]);

    let TransportEvent::Closed { reason } = next_event(&mut events).await else {
        panic!("expected close");
    };
    assert_eq!(reason.as_deref(), Some("maintenance"));
}

#[tokio::test]
async fn test_stream_reports_rejected_subscription() {
    let (addr, _subscribe_rx, _closed_rx) = start_venue(Script::Reject).await;
    let request = StreamRequest::new(btc(), 50);

    let mut events = connector(addr)
        .open(&request, CancellationToken::new())
        .await
        .unwrap();

    let TransportEvent::Error(TransportError::Rejected(reason)) = next_event(&mut events).await
    else {
        panic!("expected rejected subscription");
    };
    assert!(reason.contains("handler not found"));
}

#[tokio::test]
async fn test_stream_closes_socket_on_cancel() {
    let (addr, _subscribe_rx, closed_rx) = start_venue(Script::AckAndWait).await;
    let request = StreamRequest::new(btc(), 50);
    let cancel = CancellationToken::new();

    let mut events = connector(addr).open(&request, cancel.clone()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, TransportEvent::Subscribed));

    cancel.cancel();

    let saw_close = timeout(Duration::from_secs(5), closed_rx)
        .await
        .expect("server never saw the connection end")
        .unwrap();
    assert!(saw_close);
}

#[tokio::test]
async fn test_stream_connect_failure() {
    // Bind and drop to get a port nobody is listening on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let request = StreamRequest::new(btc(), 50);

    let err = connector(addr)
        .open(&request, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Connect(_)));
}
