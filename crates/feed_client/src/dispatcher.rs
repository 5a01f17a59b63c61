//! Local one-to-many publish/subscribe.
//!
//! Topics are plain strings; listeners for a topic are invoked in
//! registration order. A failing listener is logged and does not stop
//! dispatch to the remaining listeners.

use common::protocol::{price_by_token_topic, token_of_price_room, MessageData};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Handle returned by `on`/`once`, used to remove the registration.
/// Rust closures have no identity, so removal is by id rather than by
/// callback value.
pub type ListenerId = u64;

type Callback = Arc<dyn Fn(&MessageData) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    id: ListenerId,
    callback: Callback,
    once: bool,
}

/// Topic → ordered listener list.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent listener for a topic.
    pub fn on<F>(&self, topic: &str, callback: F) -> ListenerId
    where
        F: Fn(&MessageData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), false)
    }

    /// Register a one-shot listener, removed after its first delivery.
    pub fn once<F>(&self, topic: &str, callback: F) -> ListenerId
    where
        F: Fn(&MessageData) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), true)
    }

    fn register(&self, topic: &str, callback: Callback, once: bool) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut map = self.listeners.write().unwrap();
        map.entry(topic.to_string()).or_default().push(Registration {
            id,
            callback,
            once,
        });
        id
    }

    /// Remove one registration. Returns false if it was not found
    /// (already removed, or never registered for this topic).
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut map = self.listeners.write().unwrap();
        let Some(regs) = map.get_mut(topic) else {
            return false;
        };
        let before = regs.len();
        regs.retain(|r| r.id != id);
        let removed = regs.len() < before;
        if regs.is_empty() {
            map.remove(topic);
        }
        removed
    }

    /// Deliver a payload to every listener currently registered for
    /// `topic`, in registration order.
    pub fn emit(&self, topic: &str, data: &MessageData) {
        // Snapshot under the read lock so listeners may call on/off/once
        // re-entrantly without deadlocking.
        let batch: Vec<(ListenerId, Callback, bool)> = {
            let map = self.listeners.read().unwrap();
            match map.get(topic) {
                Some(regs) => regs
                    .iter()
                    .map(|r| (r.id, r.callback.clone(), r.once))
                    .collect(),
                None => return,
            }
        };

        let mut spent = Vec::new();
        for (id, callback, once) in batch {
            if let Err(e) = callback(data) {
                warn!("listener {} for topic '{}' failed: {:#}", id, topic, e);
                metrics::counter!("feed_listener_errors_total").increment(1);
            }
            if once {
                spent.push(id);
            }
        }

        if !spent.is_empty() {
            let mut map = self.listeners.write().unwrap();
            if let Some(regs) = map.get_mut(topic) {
                regs.retain(|r| !spent.contains(&r.id));
                if regs.is_empty() {
                    map.remove(topic);
                }
            }
        }
    }

    /// Dispatch an inbound room message: the literal room topic plus,
    /// for price rooms, the derived token-scoped topic.
    pub fn dispatch(&self, room: &str, data: &MessageData) {
        self.emit(room, data);
        if let Some(token) = token_of_price_room(room) {
            self.emit(&price_by_token_topic(token), data);
        }
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners
            .read()
            .unwrap()
            .get(topic)
            .map_or(0, |regs| regs.len())
    }

    /// Drop every registration. Used on teardown.
    pub fn clear(&self) {
        self.listeners.write().unwrap().clear();
    }
}
