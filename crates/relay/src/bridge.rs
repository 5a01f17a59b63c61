//! One bridge per inbound connection: connects upstream, joins the
//! bound room, and pumps translated frames downstream until either
//! side closes.
//!
//! There is no reconnection here. When the upstream drops, the
//! downstream gets a terminal error frame and a close; the browser
//! owns the retry decision.

use crate::error::{RelayError, Result};
use crate::translate::{PriceTranslator, RelayFrame};
use crate::ws_server::RelayConfig;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use common::protocol::WireMessage;
use common::tls::tls_connector;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message as TungsteniteMessage, MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RelayBridge {
    session: Uuid,
    translator: PriceTranslator,
    config: RelayConfig,
}

impl RelayBridge {
    pub fn new(token: &str, config: RelayConfig) -> Self {
        Self {
            session: Uuid::new_v4(),
            translator: PriceTranslator::new(token),
            config,
        }
    }

    /// Drive the session to completion. Consumes the bridge; a failed
    /// session is not reused.
    pub async fn run(mut self, mut downstream: WebSocket) {
        counter!("relay_sessions_total").increment(1);
        info!(
            "[{}] session opened for room '{}'",
            self.session,
            self.translator.room()
        );

        let mut upstream = match self.connect_upstream().await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("[{}] upstream connect failed: {}", self.session, e);
                counter!("relay_upstream_failures_total").increment(1);
                let _ = Self::send_frame(&mut downstream, &RelayFrame::from_error(&e)).await;
                let _ = downstream.close().await;
                return;
            }
        };

        gauge!("relay_active_sessions").increment(1.0);
        self.pump(&mut downstream, &mut upstream).await;
        gauge!("relay_active_sessions").decrement(1.0);

        info!("[{}] session closed", self.session);
    }

    async fn connect_upstream(&self) -> Result<UpstreamStream> {
        // Reject malformed URLs before attempting a handshake.
        let url = Url::parse(&self.config.upstream_url_with_key())
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;
        let connector =
            tls_connector().map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;
        let connect = connect_async_tls_with_config(url.as_str(), None, false, Some(connector));
        let (mut ws, _) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| RelayError::UpstreamUnavailable("connect timed out".to_string()))?
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        let join = WireMessage::join(self.translator.room());
        ws.send(TungsteniteMessage::Text(serde_json::to_string(&join)?))
            .await?;
        debug!("[{}] joined '{}'", self.session, self.translator.room());
        Ok(ws)
    }

    /// Forward upstream messages downstream until one side ends. The
    /// sides are coupled: whichever closes first tears the other down.
    async fn pump(&mut self, downstream: &mut WebSocket, upstream: &mut UpstreamStream) {
        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.reset(); // Don't fire immediately

        loop {
            tokio::select! {
                msg = upstream.next() => {
                    match msg {
                        Some(Ok(TungsteniteMessage::Text(text))) => {
                            counter!("relay_upstream_messages_total").increment(1);
                            if let Some(frame) = self.translate_text(&text) {
                                if Self::send_frame(downstream, &frame).await.is_err() {
                                    // Downstream went away mid-send.
                                    let _ = self.leave_and_close(upstream).await;
                                    break;
                                }
                                counter!("relay_forwarded_total").increment(1);
                            }
                        }
                        Some(Ok(TungsteniteMessage::Ping(data))) => {
                            if upstream.send(TungsteniteMessage::Pong(data)).await.is_err() {
                                self.close_downstream_with_error(
                                    downstream,
                                    RelayError::UpstreamUnavailable("upstream send failed".to_string()),
                                ).await;
                                break;
                            }
                        }
                        Some(Ok(TungsteniteMessage::Pong(_)))
                        | Some(Ok(TungsteniteMessage::Frame(_)))
                        | Some(Ok(TungsteniteMessage::Binary(_))) => {}
                        Some(Ok(TungsteniteMessage::Close(frame))) => {
                            info!("[{}] upstream closed: {:?}", self.session, frame);
                            self.close_downstream_with_error(
                                downstream,
                                RelayError::UpstreamUnavailable("upstream connection closed".to_string()),
                            ).await;
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("[{}] upstream error: {}", self.session, e);
                            self.close_downstream_with_error(downstream, RelayError::WebSocket(e))
                                .await;
                            break;
                        }
                        None => {
                            info!("[{}] upstream stream ended", self.session);
                            self.close_downstream_with_error(
                                downstream,
                                RelayError::UpstreamUnavailable("upstream connection lost".to_string()),
                            ).await;
                            break;
                        }
                    }
                }

                msg = downstream.recv() => {
                    match msg {
                        Some(Ok(AxumMessage::Ping(data))) => {
                            if downstream.send(AxumMessage::Pong(data)).await.is_err() {
                                let _ = self.leave_and_close(upstream).await;
                                break;
                            }
                        }
                        Some(Ok(AxumMessage::Close(_))) | None => {
                            info!("[{}] downstream closed", self.session);
                            let _ = self.leave_and_close(upstream).await;
                            break;
                        }
                        Some(Ok(_)) => {
                            // Inbound client payloads are not part of this
                            // protocol; ignore them.
                        }
                        Some(Err(e)) => {
                            debug!("[{}] downstream error: {}", self.session, e);
                            let _ = self.leave_and_close(upstream).await;
                            break;
                        }
                    }
                }

                // Keepalive: pings hold an idle upstream open through NATs.
                _ = ping.tick() => {
                    if upstream.send(TungsteniteMessage::Ping(vec![])).await.is_err() {
                        self.close_downstream_with_error(
                            downstream,
                            RelayError::UpstreamUnavailable("upstream send failed".to_string()),
                        ).await;
                        break;
                    }
                }
            }
        }
    }

    /// Parse and translate one upstream frame. Malformed frames are
    /// dropped without ending the session.
    fn translate_text(&mut self, text: &str) -> Option<RelayFrame> {
        match WireMessage::parse(text) {
            Ok(msg) => self.translator.translate(&msg),
            Err(e) => {
                warn!("[{}] dropping malformed upstream frame: {}", self.session, e);
                counter!("relay_protocol_errors_total").increment(1);
                None
            }
        }
    }

    async fn send_frame(downstream: &mut WebSocket, frame: &RelayFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        downstream
            .send(AxumMessage::Text(text))
            .await
            .map_err(|_| RelayError::DownstreamClosed)
    }

    async fn close_downstream_with_error(&self, downstream: &mut WebSocket, err: RelayError) {
        let _ = Self::send_frame(downstream, &RelayFrame::from_error(&err)).await;
        let _ = downstream.send(AxumMessage::Close(None)).await;
    }

    async fn leave_and_close(&self, upstream: &mut UpstreamStream) -> Result<()> {
        let leave = WireMessage::leave(self.translator.room());
        upstream
            .send(TungsteniteMessage::Text(serde_json::to_string(&leave)?))
            .await?;
        upstream.close(None).await?;
        Ok(())
    }
}
