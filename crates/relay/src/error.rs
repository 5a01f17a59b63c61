//! Relay error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The upgrade request carried no topic. Rejected before upgrade;
    /// no upstream connection is created.
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// The upstream connection failed. The downstream is closed with a
    /// terminal error frame and the bridge instance is discarded.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("downstream send failed")]
    DownstreamClosed,
}

impl RelayError {
    /// Code carried in a terminal downstream error frame.
    pub fn wire_code(&self) -> &'static str {
        match self {
            RelayError::MissingParameter(_) => "MISSING_PARAMETER",
            RelayError::Json(_) => "PROTOCOL_ERROR",
            RelayError::UpstreamUnavailable(_)
            | RelayError::WebSocket(_)
            | RelayError::DownstreamClosed => "UPSTREAM_UNAVAILABLE",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}


pub type Result<T> = std::result::Result<T, RelayError>;
