//! Relay bridge: pairs one downstream (browser-facing) WebSocket with
//! one upstream (provider-facing) WebSocket, scoped to a single token.
//!
//! Used where the browser cannot or should not hold the upstream
//! credential directly. One bridge instance per inbound connection;
//! instances share no mutable state. There is no reconnection at this
//! layer: a bridge is torn down, not resumed, on failure.
//!
//! ```text
//! browser ── /ws/price?token=X ──> RelayBridge ──> upstream provider
//!                                   │  join price:X
//!                                   │  forward price:X only
//!                                   └─ translate + derive priceDelta
//! ```

pub mod bridge;
pub mod error;
pub mod translate;
pub mod ws_server;

pub use bridge::RelayBridge;
pub use error::{RelayError, Result};
pub use translate::{PriceTranslator, PriceUpdate, RelayFrame};
pub use ws_server::{create_router, AppState, RelayConfig};
