//! Desired room memberships and the room → physical-channel partition.

use common::protocol::TRANSACTION_ROOM_PREFIX;
use std::collections::HashSet;
use std::sync::RwLock;

/// The two physical channels rooms are multiplexed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Main,
    Transaction,
}

impl ChannelKind {
    /// Partition rule, pure and total over room keys: transaction rooms
    /// ride the transaction channel, everything else the main channel.
    /// Join, leave, and replay-on-reconnect all go through here.
    pub fn for_room(room: &str) -> Self {
        if room.starts_with(TRANSACTION_ROOM_PREFIX) {
            Self::Transaction
        } else {
            Self::Main
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Transaction => "transaction",
        }
    }
}

/// The set of rooms the application currently wants to be in,
/// independent of any socket's lifetime. This is the source of truth
/// replayed on every reconnect; entries are never silently expired.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the room was not already joined.
    pub fn join(&self, room: &str) -> bool {
        self.rooms.write().unwrap().insert(room.to_string())
    }

    /// Returns true if the room was joined.
    pub fn leave(&self, room: &str) -> bool {
        self.rooms.write().unwrap().remove(room)
    }

    pub fn contains(&self, room: &str) -> bool {
        self.rooms.read().unwrap().contains(room)
    }

    /// Rooms whose partition maps to the given channel.
    pub fn rooms_for(&self, kind: ChannelKind) -> Vec<String> {
        self.rooms
            .read()
            .unwrap()
            .iter()
            .filter(|room| ChannelKind::for_room(room) == kind)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<String> {
        self.rooms.read().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.read().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.rooms.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_rule_is_total() {
        assert_eq!(ChannelKind::for_room("price:TOKENX"), ChannelKind::Main);
        assert_eq!(
            ChannelKind::for_room("transaction:sig1"),
            ChannelKind::Transaction
        );
        assert_eq!(ChannelKind::for_room(""), ChannelKind::Main);
        assert_eq!(ChannelKind::for_room("anything-else"), ChannelKind::Main);
    }

    #[test]
    fn duplicate_join_is_a_set_noop() {
        let registry = RoomRegistry::new();
        assert!(registry.join("price:T"));
        assert!(!registry.join("price:T"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn leave_of_unjoined_room_is_a_noop() {
        let registry = RoomRegistry::new();
        assert!(!registry.leave("price:T"));
        registry.join("price:T");
        assert!(registry.leave("price:T"));
        assert!(registry.is_empty());
    }

    #[test]
    fn rooms_are_filtered_by_channel() {
        let registry = RoomRegistry::new();
        registry.join("price:A");
        registry.join("price:B");
        registry.join("transaction:x");

        let mut main = registry.rooms_for(ChannelKind::Main);
        main.sort();
        assert_eq!(main, vec!["price:A", "price:B"]);
        assert_eq!(
            registry.rooms_for(ChannelKind::Transaction),
            vec!["transaction:x"]
        );
    }

    #[test]
    fn set_reflects_join_leave_sequences() {
        let registry = RoomRegistry::new();
        registry.join("price:A");
        registry.join("price:B");
        registry.leave("price:A");
        registry.join("price:C");
        registry.leave("price:C");

        assert_eq!(registry.all(), vec!["price:B"]);
    }
}
