//! Upstream → downstream payload translation.
//!
//! The bridge is single-topic: only `message` envelopes for the bound
//! room are translated; everything else is dropped. The upstream does
//! not supply deltas, so `priceDelta` is derived locally against the
//! previous price seen on this connection.

use crate::error::RelayError;
use chrono::Utc;
use common::protocol::{price_room, WireMessage};
use serde::Serialize;

/// Downstream frame: `{ type: "price"|"error", data: {...} }`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum RelayFrame {
    Price(PriceUpdate),
    Error(ErrorInfo),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub token: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_in_quote_asset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidity: Option<f64>,
    /// Change against the previous price seen on this connection;
    /// zero for the first update.
    pub price_delta: f64,
    /// Emission timestamp, milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorInfo {
    pub message: String,
    pub code: String,
}

impl RelayFrame {
    /// Terminal frame describing why the session is ending.
    pub fn from_error(err: &RelayError) -> Self {
        Self::Error(ErrorInfo {
            message: err.to_string(),
            code: err.wire_code().to_string(),
        })
    }
}

/// Per-connection translation state for one bound token.
pub struct PriceTranslator {
    token: String,
    room: String,
    last_price: Option<f64>,
}

impl PriceTranslator {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            room: price_room(token),
            last_price: None,
        }
    }

    /// The room this bridge is bound to.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Translate one upstream envelope. Returns None when the frame is
    /// not a message for the bound room, or carries no price.
    pub fn translate(&mut self, msg: &WireMessage) -> Option<RelayFrame> {
        let WireMessage::Message { room, data } = msg else {
            return None;
        };
        if room != &self.room {
            return None;
        }
        let price = data.price?;
        let price_delta = self.last_price.map(|last| price - last).unwrap_or(0.0);
        self.last_price = Some(price);

        Some(RelayFrame::Price(PriceUpdate {
            token: self.token.clone(),
            price,
            price_in_quote_asset: data.price_in_quote_asset,
            market_cap: data.market_cap,
            liquidity: data.liquidity,
            price_delta,
            timestamp: Utc::now().timestamp_millis(),
        }))
    }
}
