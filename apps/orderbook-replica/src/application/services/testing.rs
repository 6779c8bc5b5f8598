//! Scripted port doubles shared by the service tests.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BookSnapshot, BookUpdate, SnapshotFetchError, SnapshotSource, StreamConnector, StreamRequest,
    TransportError, TransportEvent, UpdateKind,
};
use crate::domain::book::Level;
use crate::domain::subscription::Symbol;

pub fn levels(pairs: &[(&str, &str)]) -> Vec<Level> {
    pairs
        .iter()
        .map(|(p, q)| Level::new(Decimal::from_str(p).unwrap(), Decimal::from_str(q).unwrap()))
        .collect()
}

pub fn snapshot(symbol: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> BookSnapshot {
    BookSnapshot::new(symbol, levels(bids), levels(asks))
}

pub fn book(
    symbol: &str,
    kind: UpdateKind,
    bids: &[(&str, &str)],
    asks: &[(&str, &str)],
) -> TransportEvent {
    TransportEvent::Book(BookUpdate {
        symbol: symbol.to_string(),
        kind,
        bids: levels(bids),
        asks: levels(asks),
    })
}

pub fn delta(symbol: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> TransportEvent {
    book(symbol, UpdateKind::Delta, bids, asks)
}

/// Returns queued responses in order; the last one repeats.
#[derive(Default)]
pub struct ScriptedSnapshots {
    responses: Mutex<VecDeque<Result<BookSnapshot, SnapshotFetchError>>>,
    symbols: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedSnapshots {
    pub fn push(&self, response: Result<BookSnapshot, SnapshotFetchError>) {
        self.responses.lock().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn symbols(&self) -> Vec<String> {
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

/// Hands out pre-built event channels, one per `open`.
#[derive(Default)]
pub struct ScriptedConnector {
    opens: Mutex<VecDeque<Result<mpsc::Receiver<TransportEvent>, TransportError>>>,
    requests: Mutex<Vec<StreamRequest>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedConnector {
    pub fn push_stream(&self) -> mpsc::Sender<TransportEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.opens.lock().push_back(Ok(rx));
        tx
    }

    pub fn push_error(&self, error: TransportError) {
        self.opens.lock().push_back(Err(error));
    }

    pub fn open_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }

    pub fn transport_tokens(&self) -> Vec<CancellationToken> {
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
