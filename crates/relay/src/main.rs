//! Relay service entry point.
//!
//! Bridges browser WebSocket connections to the upstream price feed,
//! one upstream connection per browser connection, scoped to a single
//! token each.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use relay::{create_router, AppState, RelayConfig};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting relay service");

    // Read configuration from environment
    let upstream_url =
        env::var("UPSTREAM_WS_URL").unwrap_or_else(|_| "ws://localhost:9001/ws".to_string());
    let api_key = env::var("UPSTREAM_API_KEY").ok();
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8081".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9092".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");

    info!("Configuration:");
    info!("  UPSTREAM_WS_URL: {}", upstream_url);
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    let mut config = RelayConfig::new(upstream_url);
    if let Some(key) = api_key {
        config = config.with_api_key(key);
    }

    let state = Arc::new(AppState { config });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
