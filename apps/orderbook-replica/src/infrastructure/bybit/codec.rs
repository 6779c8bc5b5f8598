//! Bybit Stream Codec
//!
//! Turns text frames from the public stream into port events. Book pushes are
//! recognised by their `topic`, operation responses by their `op`; anything
//! else is ignored. A frame that cannot be used is a [`ProtocolViolation`]
//! and only that frame is dropped.

use std::str::FromStr;

use rust_decimal::Decimal;

use super::messages::{BookFrame, OpRequest, OpResponse, RawLevel};
use crate::application::ports::{BookUpdate, ProtocolViolation, UpdateKind};
use crate::domain::book::Level;

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Order book push.
    Book(BookUpdate),
    /// Subscribe acknowledgement.
    Subscribed {
        /// Whether the venue accepted the topic.
        success: bool,
        /// Venue message.
        message: Option<String>,
    },
    /// Heartbeat response.
    Pong,
    /// Frame with nothing for us.
    Ignored,
}

/// JSON codec for the Bybit public stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct BybitCodec;

impl BybitCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] for frames that are not valid JSON,
    /// carry an unknown book type, or contain unparseable levels.
    pub fn decode(&self, text: &str) -> Result<Inbound, ProtocolViolation> {
        let value: serde_json::Value = serde_json::from_str(text.trim())
            .map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;

        if value.get("topic").is_some() {
            let frame: BookFrame = serde_json::from_value(value)
                .map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
            return decode_book(frame).map(Inbound::Book);
        }

        if value.get("op").is_some() {
            let response: OpResponse = serde_json::from_value(value)
                .map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
            return Ok(match response.op.as_str() {
                "subscribe" => Inbound::Subscribed {
                    success: response.success.unwrap_or(true),
                    message: response.ret_msg,
                },
                // Spot answers a ping with `op: "ping", ret_msg: "pong"`.
                "ping" | "pong" => Inbound::Pong,
                _ => Inbound::Ignored,
            });
        }

        Ok(Inbound::Ignored)
    }

    /// Encode an outbound operation.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, request: &OpRequest) -> Result<String, serde_json::Error> {
        request.to_json()
    }
}

fn decode_book(frame: BookFrame) -> Result<BookUpdate, ProtocolViolation> {
    let kind = match frame.kind.as_str() {
        "snapshot" => UpdateKind::Snapshot,
        "delta" => UpdateKind::Delta,
        other => return Err(ProtocolViolation::UnknownType(other.to_string())),
    };
    let data = frame
        .data
        .into_data()
        .ok_or_else(|| ProtocolViolation::Malformed(format!("empty data on {}", frame.topic)))?;

    let symbol = if data.s.is_empty() {
        topic_symbol(&frame.topic).to_string()
    } else {
        data.s
    };

    Ok(BookUpdate {
        symbol,
        kind,
        bids: parse_levels(&data.b).map_err(ProtocolViolation::InvalidLevel)?,
        asks: parse_levels(&data.a).map_err(ProtocolViolation::InvalidLevel)?,
    })
}

/// Last dot-separated segment of `orderbook.{depth}.{SYMBOL}`.
fn topic_symbol(topic: &str) -> &str {
    topic.rsplit('.').next().unwrap_or(topic)
}

/// Parse venue levels. An empty quantity means zero (remove the level).
///
/// # Errors
///
/// Returns a description of the first level with an unparseable or negative
/// price or quantity.
pub fn parse_levels(raw: &[RawLevel]) -> Result<Vec<Level>, String> {
    raw.iter().map(parse_level).collect()
}

fn parse_level([price, quantity]: &RawLevel) -> Result<Level, String> {
    let price = Decimal::from_str(price.trim()).map_err(|e| format!("price {price:?}: {e}"))?;
    let quantity = if quantity.trim().is_empty() {
        Decimal::ZERO
    } else {
        Decimal::from_str(quantity.trim()).map_err(|e| format!("quantity {quantity:?}: {e}"))?
    };
    if price.is_sign_negative() || quantity.is_sign_negative() {
        return Err(format!("negative level [{price}, {quantity}]"));
    }
    Ok(Level::new(price, quantity))
}
