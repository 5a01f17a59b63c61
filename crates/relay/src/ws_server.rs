//! HTTP surface: WebSocket upgrade endpoint and health check, using
//! Axum.

use crate::bridge::RelayBridge;
use crate::error::RelayError;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Relay configuration, shared read-only by all sessions.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream WebSocket URL, without credential.
    pub upstream_url: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    /// Interval between keepalive pings on the upstream socket.
    pub ping_interval: Duration,
}

impl RelayConfig {
    pub fn new(upstream_url: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            api_key: None,
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Upstream URL with the credential appended as a query parameter.
    pub fn upstream_url_with_key(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let sep = if self.upstream_url.contains('?') { '&' } else { '?' };
                format!("{}{}apiKey={}", self.upstream_url, sep, key)
            }
            None => self.upstream_url.clone(),
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub config: RelayConfig,
}

/// Create the relay router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/price", get(price_ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    r#"{"status":"ok"}"#
}

#[derive(Debug, Deserialize)]
struct PriceParams {
    token: Option<String>,
}

/// WebSocket upgrade handler for one price topic.
///
/// A request without a token is rejected with 400 before the upgrade
/// completes; no upstream connection is made for it.
async fn price_ws_handler(
    Query(params): Query<PriceParams>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match params.token.as_deref() {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => {
            warn!("rejecting /ws/price upgrade without token");
            counter!("relay_rejected_requests_total").increment(1);
            return RelayError::MissingParameter("token").into_response();
        }
    };

    info!("upgrading /ws/price for token '{}'", token);
    let config = state.config.clone();
    ws.on_upgrade(move |socket| RelayBridge::new(&token, config).run(socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: RelayConfig::new("ws://localhost:1"),
        })
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        let mut request = Request::builder()
            .uri(uri)
            .header("host", "localhost")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        // `WebSocketUpgrade` requires hyper's `OnUpgrade` extension, which
        // only real server connections carry; give oneshot requests one.
        request
            .extensions_mut()
            .insert(hyper::upgrade::on(&mut axum::http::Request::new(())));
        request
    }

    #[tokio::test]
    async fn upgrade_without_token_is_rejected() {
        let app = create_router(test_state());
        let response = app.oneshot(upgrade_request("/ws/price")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upgrade_with_empty_token_is_rejected() {
        let app = create_router(test_state());
        let response = app
            .oneshot(upgrade_request("/ws/price?token="))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upgrade_with_token_switches_protocols() {
        let app = create_router(test_state());
        let response = app
            .oneshot(upgrade_request("/ws/price?token=TOKA"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn api_key_is_appended_as_query_parameter() {
        let config = RelayConfig::new("wss://feed.example/ws").with_api_key("k1");
        assert_eq!(config.upstream_url_with_key(), "wss://feed.example/ws?apiKey=k1");

        let config = RelayConfig::new("wss://feed.example/ws?v=2").with_api_key("k1");
        assert_eq!(
            config.upstream_url_with_key(),
            "wss://feed.example/ws?v=2&apiKey=k1"
        );

        let config = RelayConfig::new("wss://feed.example/ws");
        assert_eq!(config.upstream_url_with_key(), "wss://feed.example/ws");
    }
}
