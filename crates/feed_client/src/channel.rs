//! Channel worker: drives one physical WebSocket connection through the
//! connection state machine.
//!
//! One worker task per channel ("main", "transaction"). Commands arrive
//! on an mpsc channel; socket events and the reconnect timer feed the
//! state machine, whose actions the worker performs against the real
//! socket. Sends are fire-and-forget against the outbound buffer.

use crate::dedup::DedupFilter;
use crate::dispatcher::EventDispatcher;
use crate::rooms::{ChannelKind, RoomRegistry};
use crate::state::{ChannelAction, ChannelEvent, ChannelStateMachine, ConnectionState};
use common::backoff::ReconnectPolicy;
use common::error::{Error, Result};
use common::protocol::WireMessage;
use common::tls::tls_connector;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, Sleep};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type RetryTimer = Option<Pin<Box<Sleep>>>;

/// Commands the façade sends to a channel worker.
#[derive(Debug)]
pub enum ChannelCommand {
    Connect,
    Disconnect,
    /// Send a join for this room if the channel is open. The registry
    /// was already updated by the façade.
    JoinRoom(String),
    /// Send a leave for this room if the channel is open.
    LeaveRoom(String),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upstream WebSocket URL, credential included.
    pub url: String,
    pub connect_timeout: Duration,
    pub dedup_capacity: usize,
    pub policy: ReconnectPolicy,
    /// Interval between keepalive pings on an open socket.
    pub ping_interval: Duration,
}

pub struct ChannelWorker {
    kind: ChannelKind,
    config: ChannelConfig,
    machine: ChannelStateMachine,
    rooms: Arc<RoomRegistry>,
    dispatcher: Arc<EventDispatcher>,
    dedup: DedupFilter,
    command_rx: mpsc::Receiver<ChannelCommand>,
    shutdown: bool,
}

impl ChannelWorker {
    pub fn new(
        kind: ChannelKind,
        config: ChannelConfig,
        rooms: Arc<RoomRegistry>,
        dispatcher: Arc<EventDispatcher>,
        command_rx: mpsc::Receiver<ChannelCommand>,
    ) -> Self {
        let machine = ChannelStateMachine::new(config.policy.clone());
        let dedup = DedupFilter::new(config.dedup_capacity);
        Self {
            kind,
            config,
            machine,
            rooms,
            dispatcher,
            dedup,
            command_rx,
            shutdown: false,
        }
    }

    pub async fn run(mut self) {
        let mut socket: Option<WsStream> = None;
        let mut retry: RetryTimer = None;
        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.reset(); // Don't fire immediately

        info!("[{}] channel worker started", self.kind.label());

        while !self.shutdown {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, &mut socket, &mut retry).await,
                        // Façade dropped; tear down.
                        None => break,
                    }
                }

                () = async { retry.as_mut().unwrap().as_mut().await }, if retry.is_some() => {
                    retry = None;
                    self.step(ChannelEvent::RetryTimerFired, &mut socket, &mut retry).await;
                }

                msg = async { socket.as_mut().unwrap().next().await }, if socket.is_some() => {
                    self.on_socket_event(msg, &mut socket, &mut retry).await;
                }

                // Keepalive: pings hold idle connections open through NATs.
                _ = ping.tick(), if socket.is_some() => {
                    if let Some(ws) = socket.as_mut() {
                        if ws.send(Message::Ping(vec![])).await.is_err() {
                            self.drop_socket(&mut socket);
                            self.step(ChannelEvent::SocketError, &mut socket, &mut retry).await;
                        }
                    }
                }
            }
        }

        if let Some(mut ws) = socket.take() {
            let _ = ws.close(None).await;
            gauge!("feed_open_connections", "channel" => self.kind.label()).decrement(1.0);
        }
        info!("[{}] channel worker stopped", self.kind.label());
    }

    async fn handle_command(
        &mut self,
        cmd: ChannelCommand,
        socket: &mut Option<WsStream>,
        retry: &mut RetryTimer,
    ) {
        match cmd {
            ChannelCommand::Connect => {
                self.step(ChannelEvent::ConnectRequested, socket, retry).await;
            }
            ChannelCommand::Disconnect => {
                self.step(ChannelEvent::DisconnectRequested, socket, retry).await;
            }
            ChannelCommand::JoinRoom(room) => {
                self.send_room_command(WireMessage::join(&room), socket, retry).await;
            }
            ChannelCommand::LeaveRoom(room) => {
                self.send_room_command(WireMessage::leave(&room), socket, retry).await;
            }
            ChannelCommand::Shutdown => {
                info!("[{}] shutdown requested", self.kind.label());
                self.shutdown = true;
                self.step(ChannelEvent::DisconnectRequested, socket, retry).await;
            }
        }
    }

    /// Send a join/leave frame when the channel is open. When it is not,
    /// the registry already holds the desired state and the next replay
    /// covers it.
    async fn send_room_command(
        &mut self,
        frame: WireMessage,
        socket: &mut Option<WsStream>,
        retry: &mut RetryTimer,
    ) {
        if self.machine.state() != ConnectionState::Open {
            debug!(
                "[{}] not connected; command for '{}' deferred to replay",
                self.kind.label(),
                frame.room()
            );
            return;
        }
        if let Err(e) = self.send_frame(socket, &frame).await {
            warn!("[{}] send failed: {}", self.kind.label(), e);
            self.drop_socket(socket);
            self.step(ChannelEvent::SocketError, socket, retry).await;
        }
    }

    async fn on_socket_event(
        &mut self,
        msg: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
        socket: &mut Option<WsStream>,
        retry: &mut RetryTimer,
    ) {
        match msg {
            Some(Ok(Message::Text(text))) => {
                counter!("feed_messages_received_total", "channel" => self.kind.label())
                    .increment(1);
                self.dispatch_text(&text);
            }
            Some(Ok(Message::Ping(data))) => {
                if let Some(ws) = socket.as_mut() {
                    if ws.send(Message::Pong(data)).await.is_err() {
                        self.drop_socket(socket);
                        self.step(ChannelEvent::SocketError, socket, retry).await;
                    }
                }
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Binary(_))) => {
                debug!("[{}] ignoring binary frame", self.kind.label());
            }
            Some(Ok(Message::Close(frame))) => {
                info!("[{}] received close frame: {:?}", self.kind.label(), frame);
                self.drop_socket(socket);
                self.step(ChannelEvent::SocketClosed, socket, retry).await;
            }
            Some(Err(e)) => {
                warn!("[{}] socket error: {}", self.kind.label(), e);
                self.drop_socket(socket);
                self.step(ChannelEvent::SocketError, socket, retry).await;
            }
            None => {
                info!("[{}] socket stream ended", self.kind.label());
                self.drop_socket(socket);
                self.step(ChannelEvent::SocketClosed, socket, retry).await;
            }
        }
    }

    /// Validate one inbound frame, dedup by transaction id, dispatch.
    /// Malformed frames are dropped; the connection stays open.
    fn dispatch_text(&mut self, text: &str) {
        match WireMessage::parse(text) {
            Ok(WireMessage::Message { room, data }) => {
                if let Some(tx) = data.tx.as_deref() {
                    if !self.dedup.first_seen(tx) {
                        debug!("[{}] duplicate tx '{}' dropped", self.kind.label(), tx);
                        counter!("feed_duplicates_dropped_total", "channel" => self.kind.label())
                            .increment(1);
                        return;
                    }
                }
                self.dispatcher.dispatch(&room, &data);
            }
            Ok(other) => {
                // Join/leave echoes from upstream carry no payload.
                debug!("[{}] ignoring {:?}", self.kind.label(), other);
            }
            Err(e) => {
                warn!("[{}] dropping malformed frame: {}", self.kind.label(), e);
                counter!("feed_protocol_errors_total", "channel" => self.kind.label())
                    .increment(1);
            }
        }
    }

    /// Apply one event to the state machine and perform the resulting
    /// actions. Actions can produce follow-up events (an opened socket,
    /// a failed open), which are processed in order.
    async fn step(
        &mut self,
        event: ChannelEvent,
        socket: &mut Option<WsStream>,
        retry: &mut RetryTimer,
    ) {
        let mut events = VecDeque::from([event]);

        while let Some(event) = events.pop_front() {
            for action in self.machine.handle(event) {
                match action {
                    ChannelAction::OpenSocket => match self.open_socket().await {
                        Ok(ws) => {
                            info!("[{}] connected", self.kind.label());
                            gauge!("feed_open_connections", "channel" => self.kind.label())
                                .increment(1.0);
                            *socket = Some(ws);
                            events.push_back(ChannelEvent::SocketOpened);
                        }
                        Err(e) => {
                            warn!("[{}] connect failed: {}", self.kind.label(), e);
                            counter!("feed_connect_failures_total", "channel" => self.kind.label())
                                .increment(1);
                            events.push_back(ChannelEvent::SocketError);
                        }
                    },
                    ChannelAction::ReplayRooms => {
                        if let Err(e) = self.replay_rooms(socket).await {
                            warn!("[{}] room replay failed: {}", self.kind.label(), e);
                            self.drop_socket(socket);
                            events.push_back(ChannelEvent::SocketError);
                        }
                    }
                    ChannelAction::ScheduleRetry(delay) => {
                        info!("[{}] reconnecting in {:?}", self.kind.label(), delay);
                        *retry = Some(Box::pin(sleep(delay)));
                    }
                    ChannelAction::CancelRetry => {
                        *retry = None;
                    }
                    ChannelAction::CloseSocket => {
                        if let Some(mut ws) = socket.take() {
                            let _ = ws.close(None).await;
                            gauge!("feed_open_connections", "channel" => self.kind.label())
                                .decrement(1.0);
                        }
                        events.push_back(ChannelEvent::SocketClosed);
                    }
                    ChannelAction::ClearDedup => {
                        self.dedup.clear();
                    }
                }
            }
        }
    }

    async fn open_socket(&self) -> Result<WsStream> {
        // Reject malformed URLs before attempting a handshake.
        let url = Url::parse(self.config.url.as_str())?;
        let connector = tls_connector()?;
        let connect = connect_async_tls_with_config(url.as_str(), None, false, Some(connector));
        let (ws, response) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectFailed("connect timed out".to_string()))??;
        debug!(
            "[{}] handshake complete, status: {:?}",
            self.kind.label(),
            response.status()
        );
        Ok(ws)
    }

    /// Re-send a join for every room partitioned to this channel. Join
    /// is idempotent on the receiving side, so replay is safe to repeat.
    async fn replay_rooms(&mut self, socket: &mut Option<WsStream>) -> Result<()> {
        let rooms = self.rooms.rooms_for(self.kind);
        info!(
            "[{}] replaying {} room subscription(s)",
            self.kind.label(),
            rooms.len()
        );
        for room in rooms {
            self.send_frame(socket, &WireMessage::join(&room)).await?;
        }
        Ok(())
    }

    async fn send_frame(&mut self, socket: &mut Option<WsStream>, frame: &WireMessage) -> Result<()> {
        let ws = socket.as_mut().ok_or(Error::ConnectionClosed)?;
        ws.send(Message::Text(frame.to_json()?)).await?;
        Ok(())
    }

    fn drop_socket(&self, socket: &mut Option<WsStream>) {
        if socket.take().is_some() {
            gauge!("feed_open_connections", "channel" => self.kind.label()).decrement(1.0);
        }
    }
}
