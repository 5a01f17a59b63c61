//! Resilient client-side data-distribution layer.
//!
//! Maintains two long-lived WebSocket connections to the market-data
//! backend (one for price feeds, one for transaction feeds), multiplexes
//! logical rooms over them, survives disconnects transparently, and fans
//! incoming events out to local subscribers without duplicate delivery.
//!
//! ## Architecture
//!
//! ```text
//! FeedClient (façade)
//!   ├─ RoomRegistry        desired rooms, replayed on every reconnect
//!   ├─ EventDispatcher     topic → listeners, ordered delivery
//!   └─ ChannelWorker ×2    state machine + socket, one per channel
//!        └─ DedupFilter    bounded tx-id membership test
//! ```
//!
//! The reconnect/backoff logic lives in a pure transition table
//! ([`state::ChannelStateMachine`]) so it is testable without a socket.

pub mod channel;
pub mod dedup;
pub mod dispatcher;
pub mod rooms;
pub mod service;
pub mod state;

pub use dedup::DedupFilter;
pub use dispatcher::{EventDispatcher, ListenerId};
pub use rooms::{ChannelKind, RoomRegistry};
pub use service::{FeedClient, FeedClientConfig};
pub use state::{ChannelStateMachine, ConnectionState};
