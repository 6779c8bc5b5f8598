//! Bybit WebSocket Connector
//!
//! Opens `wss://stream.bybit.com/v5/public/{category}`, subscribes to the
//! depth topic and spawns a task that forwards decoded frames as
//! [`TransportEvent`]s. The task owns the socket: it sends a close frame and
//! exits as soon as the cancellation token fires or the receiver is dropped,
//! and after the first terminal event it reports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{BybitCodec, Inbound};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
use super::messages::OpRequest;
use crate::application::ports::{StreamConnector, StreamRequest, TransportError, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// =============================================================================
// Configuration
// =============================================================================

/// Stream connector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamClientConfig {
    /// Full endpoint URL including the category path.
    pub url: String,
    /// Keepalive.
    pub heartbeat: HeartbeatConfig,
    /// Upper bound on the connect handshake.
    pub connect_timeout: Duration,
    /// Events buffered between the socket task and the feed.
    pub event_buffer: usize,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            url: "wss://stream.bybit.com/v5/public/spot".to_string(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            event_buffer: 1024,
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// [`StreamConnector`] for the Bybit public stream.
#[derive(Debug, Clone)]
pub struct BybitStreamConnector {
    config: StreamClientConfig,
    codec: BybitCodec,
}

impl BybitStreamConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: StreamClientConfig) -> Self {
        Self {
            config,
            codec: BybitCodec::new(),
        }
    }
}

#[async_trait]
impl StreamConnector for BybitStreamConnector {
    async fn open(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        tracing::info!(url = %self.config.url, topic = %request.topic(), "Connecting to order book stream");

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let connected = tokio::select! {
            () = cancel.cancelled() => return Err(TransportError::Connect("cancelled".to_string())),
            r = connect => r,
        };
        let (ws, _response) = connected
            .map_err(|_| TransportError::Connect("connect timed out".to_string()))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (mut write, read) = ws.split();
        let subscribe = self
            .codec
            .encode(&OpRequest::subscribe(vec![request.topic()]))
            .map_err(|e| TransportError::Send(e.to_string()))?;
        write
            .send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer);
        let connection = Connection {
            codec: self.codec,
            heartbeat: self.config.heartbeat,
            write,
            read,
            event_tx,
            cancel,
        };
        tokio::spawn(connection.run());
        Ok(event_rx)
    }
}

// =============================================================================
// Socket Task
// =============================================================================

struct Connection {
    codec: BybitCodec,
    heartbeat: HeartbeatConfig,
    write: WsWrite,
    read: WsRead,
    event_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
}

/// Whether the read loop keeps going.
enum Flow {
    Continue,
    Stop,
}

impl Connection {
    async fn run(mut self) {
        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(8);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatMonitor::new(
                self.heartbeat,
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _heartbeat_guard = heartbeat_cancel.drop_guard();

        loop {
            let flow = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Flow::Stop,
                () = self.event_tx.closed() => Flow::Stop,
                event = heartbeat_rx.recv() => self.on_heartbeat(event, &heartbeat_state).await,
                frame = self.read.next() => {
                    if frame.is_some() {
                        heartbeat_state.record_pong();
                    }
                    self.on_frame(frame).await
                }
            };
            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        let _ = self.write.send(Message::Close(None)).await;
        tracing::debug!("Order book stream task finished");
    }

    async fn on_heartbeat(
        &mut self,
        event: Option<HeartbeatEvent>,
        state: &HeartbeatState,
    ) -> Flow {
        match event {
            Some(HeartbeatEvent::SendPing) => {
                let ping = match self.codec.encode(&OpRequest::ping()) {
                    Ok(ping) => ping,
                    Err(e) => return self.emit_terminal(TransportEvent::Error(TransportError::Send(e.to_string()))).await,
                };
                state.mark_ping_sent();
                if let Err(e) = self.write.send(Message::Text(ping.into())).await {
                    return self
                        .emit_terminal(TransportEvent::Error(TransportError::WebSocket(e.to_string())))
                        .await;
                }
                Flow::Continue
            }
            Some(HeartbeatEvent::Timeout { elapsed }) => {
                self.emit_terminal(TransportEvent::Closed {
                    reason: Some(format!("heartbeat timeout after {}ms", elapsed.as_millis())),
                })
                .await
            }
            None => Flow::Continue,
        }
    }

    async fn on_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Flow {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()).await,
            Some(Ok(Message::Ping(payload))) => {
                if let Err(e) = self.write.send(Message::Pong(payload)).await {
                    return self
                        .emit_terminal(TransportEvent::Error(TransportError::WebSocket(e.to_string())))
                        .await;
                }
                Flow::Continue
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                tracing::info!(reason = reason.as_deref().unwrap_or("none"), "Server closed order book stream");
                self.emit_terminal(TransportEvent::Closed { reason }).await
            }
            Some(Ok(_)) => Flow::Continue,
            Some(Err(e)) => {
                self.emit_terminal(TransportEvent::Error(TransportError::WebSocket(e.to_string())))
                    .await
            }
            None => {
                self.emit_terminal(TransportEvent::Closed {
                    reason: Some("stream ended".to_string()),
                })
                .await
            }
        }
    }

    async fn on_text(&mut self, text: &str) -> Flow {
        let event = match self.codec.decode(text) {
            Ok(Inbound::Book(update)) => TransportEvent::Book(update),
            Ok(Inbound::Subscribed { success: true, .. }) => TransportEvent::Subscribed,
            Ok(Inbound::Subscribed { success: false, message }) => {
                let reason = message.unwrap_or_else(|| "subscription refused".to_string());
                return self
                    .emit_terminal(TransportEvent::Error(TransportError::Rejected(reason)))
                    .await;
            }
            Ok(Inbound::Pong | Inbound::Ignored) => return Flow::Continue,
            Err(violation) => TransportEvent::Violation(violation),
        };
        if self.event_tx.send(event).await.is_err() {
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn emit_terminal(&mut self, event: TransportEvent) -> Flow {
        let _ = self.event_tx.send(event).await;
        Flow::Stop
    }
}
