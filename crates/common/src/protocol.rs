//! Wire envelope for the physical channels.
//!
//! Every frame on a channel is `{ type: "join"|"leave"|"message", ... }`.
//! The envelope is validated at the channel boundary: anything that does
//! not parse into [`WireMessage`] is a protocol error and the single
//! message is dropped.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Room key prefix for per-token price feeds.
pub const PRICE_ROOM_PREFIX: &str = "price:";

/// Room key prefix for transaction feeds.
pub const TRANSACTION_ROOM_PREFIX: &str = "transaction:";

/// Prefix of the derived token-scoped dispatch topic. Consumers can
/// subscribe by token identity without knowing room-naming conventions.
pub const PRICE_BY_TOKEN_PREFIX: &str = "price-by-token:";

/// Wire envelope, tagged by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage {
    Join { room: String },
    Leave { room: String },
    Message { room: String, data: MessageData },
}

/// Payload of a `message` envelope.
///
/// All fields the dashboard cares about are optional; unrecognized
/// fields are preserved in `extra` so fan-out does not lose data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_in_quote_asset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liquidity: Option<f64>,
    /// Transaction id. Used as the dedup key when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireMessage {
    /// Parse one inbound frame. Failures are protocol errors, not JSON
    /// errors, so callers drop the message and keep the connection open.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))
    }

    pub fn join(room: &str) -> Self {
        Self::Join {
            room: room.to_string(),
        }
    }

    pub fn leave(room: &str) -> Self {
        Self::Leave {
            room: room.to_string(),
        }
    }

    pub fn room(&self) -> &str {
        match self {
            Self::Join { room } | Self::Leave { room } | Self::Message { room, .. } => room,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Build the room key of a token's price feed.
pub fn price_room(token: &str) -> String {
    format!("{}{}", PRICE_ROOM_PREFIX, token)
}

/// Token address of a price-feed room key, if it is one.
pub fn token_of_price_room(room: &str) -> Option<&str> {
    room.strip_prefix(PRICE_ROOM_PREFIX)
}

/// Derived dispatch topic for a token's price updates.
pub fn price_by_token_topic(token: &str) -> String {
    format!("{}{}", PRICE_BY_TOKEN_PREFIX, token)
}
