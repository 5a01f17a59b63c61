//! Error types shared by the feed client and the relay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Malformed inbound payload. The offending message is dropped;
    /// the connection stays open.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket could not open. Absorbed by the reconnect machine,
    /// never surfaced to application code.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("channel closed")]
    ChannelClosed,

    #[error("TLS error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;
