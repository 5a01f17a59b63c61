//! Client Service façade: join/leave rooms, subscribe to topics,
//! connect/disconnect lifecycle.
//!
//! Constructed once per process and passed to consumers explicitly;
//! there is no module-level singleton. Both physical channels are
//! opened eagerly on construction.

use crate::channel::{ChannelCommand, ChannelConfig, ChannelWorker};
use crate::dispatcher::{EventDispatcher, ListenerId};
use crate::rooms::{ChannelKind, RoomRegistry};
use common::backoff::ReconnectPolicy;
use common::error::{Error, Result};
use common::protocol::MessageData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Upstream URL for the main (price) channel.
    pub main_url: String,
    /// Upstream URL for the transaction channel.
    pub transaction_url: String,
    /// Per-connection credential, appended to the connection URL.
    pub api_key: Option<String>,
    pub policy: ReconnectPolicy,
    pub dedup_capacity: usize,
    pub connect_timeout: Duration,
    /// Interval between keepalive pings on an open channel.
    pub ping_interval: Duration,
}

impl FeedClientConfig {
    pub fn new(main_url: impl Into<String>, transaction_url: impl Into<String>) -> Self {
        Self {
            main_url: main_url.into(),
            transaction_url: transaction_url.into(),
            api_key: None,
            policy: ReconnectPolicy::default(),
            dedup_capacity: 4096,
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

/// The public API of the data-distribution layer.
pub struct FeedClient {
    dispatcher: Arc<EventDispatcher>,
    rooms: Arc<RoomRegistry>,
    main_tx: mpsc::Sender<ChannelCommand>,
    transaction_tx: mpsc::Sender<ChannelCommand>,
    workers: Vec<JoinHandle<()>>,
}

impl FeedClient {
    /// Construct the service and eagerly open both physical channels.
    /// Must be called from within a tokio runtime.
    pub fn new(config: FeedClientConfig) -> Self {
        let dispatcher = Arc::new(EventDispatcher::new());
        let rooms = Arc::new(RoomRegistry::new());

        let (main_tx, main_handle) =
            Self::spawn_channel(ChannelKind::Main, &config, &rooms, &dispatcher);
        let (transaction_tx, transaction_handle) =
            Self::spawn_channel(ChannelKind::Transaction, &config, &rooms, &dispatcher);

        // Eager connect; the buffer on a fresh channel always has room.
        let _ = main_tx.try_send(ChannelCommand::Connect);
        let _ = transaction_tx.try_send(ChannelCommand::Connect);

        Self {
            dispatcher,
            rooms,
            main_tx,
            transaction_tx,
            workers: vec![main_handle, transaction_handle],
        }
    }

    fn spawn_channel(
        kind: ChannelKind,
        config: &FeedClientConfig,
        rooms: &Arc<RoomRegistry>,
        dispatcher: &Arc<EventDispatcher>,
    ) -> (mpsc::Sender<ChannelCommand>, JoinHandle<()>) {
        let base_url = match kind {
            ChannelKind::Main => &config.main_url,
            ChannelKind::Transaction => &config.transaction_url,
        };
        let channel_config = ChannelConfig {
            url: channel_url(base_url, config.api_key.as_deref()),
            connect_timeout: config.connect_timeout,
            dedup_capacity: config.dedup_capacity,
            policy: config.policy.clone(),
            ping_interval: config.ping_interval,
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = ChannelWorker::new(
            kind,
            channel_config,
            rooms.clone(),
            dispatcher.clone(),
            command_rx,
        );
        let handle = tokio::spawn(worker.run());
        (command_tx, handle)
    }

    /// Establish both physical channels. Idempotent: calling while
    /// connections exist is a no-op, not an error.
    pub async fn connect(&self) -> Result<()> {
        self.send(ChannelKind::Main, ChannelCommand::Connect).await?;
        self.send(ChannelKind::Transaction, ChannelCommand::Connect)
            .await
    }

    /// Tear down both channels and cancel pending reconnects. The room
    /// set survives; a later `connect()` resumes with the same rooms.
    /// The dedup filters are cleared.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(ChannelKind::Main, ChannelCommand::Disconnect)
            .await?;
        self.send(ChannelKind::Transaction, ChannelCommand::Disconnect)
            .await
    }

    /// Add a room to the subscription set and send a join if connected.
    /// A duplicate join is a no-op for the set, but the join command is
    /// still sent; the upstream tolerates repeats.
    pub async fn join_room(&self, room: &str) -> Result<()> {
        self.rooms.join(room);
        let kind = ChannelKind::for_room(room);
        self.send(kind, ChannelCommand::JoinRoom(room.to_string()))
            .await
    }

    /// Remove a room from the subscription set and send a leave if
    /// connected. Leaving a room not currently joined is a no-op.
    pub async fn leave_room(&self, room: &str) -> Result<()> {
        if !self.rooms.leave(room) {
            return Ok(());
        }
        let kind = ChannelKind::for_room(room);
        self.send(kind, ChannelCommand::LeaveRoom(room.to_string()))
            .await
    }

    /// Subscribe to a dispatch topic (a room key, or a derived topic
    /// such as `price-by-token:<token>`).
    pub fn on<F>(&self, topic: &str, callback: F) -> ListenerId
    where
        F: Fn(&MessageData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.on(topic, callback)
    }

    /// Subscribe for a single delivery.
    pub fn once<F>(&self, topic: &str, callback: F) -> ListenerId
    where
        F: Fn(&MessageData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.once(topic, callback)
    }

    /// Remove a topic subscription.
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        self.dispatcher.off(topic, id)
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        self.rooms.all()
    }

    /// Close both channels, await the workers, and clear all local
    /// state. The service is consumed; construct a new one to resume.
    pub async fn shutdown(mut self) {
        info!("shutting down feed client");
        let _ = self.main_tx.send(ChannelCommand::Shutdown).await;
        let _ = self.transaction_tx.send(ChannelCommand::Shutdown).await;
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        self.rooms.clear();
        self.dispatcher.clear();
    }

    async fn send(&self, kind: ChannelKind, cmd: ChannelCommand) -> Result<()> {
        let tx = match kind {
            ChannelKind::Main => &self.main_tx,
            ChannelKind::Transaction => &self.transaction_tx,
        };
        tx.send(cmd).await.map_err(|_| Error::ChannelClosed)
    }
}

/// Append the credential to the connection URL.
fn channel_url(base: &str, api_key: Option<&str>) -> String {
    match api_key {
        Some(key) if base.contains('?') => format!("{}&apiKey={}", base, key),
        Some(key) => format!("{}?apiKey={}", base, key),
        None => base.to_string(),
    }
}
