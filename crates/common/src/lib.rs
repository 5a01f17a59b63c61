//! Shared types for the market-data distribution layer: wire protocol,
//! error types, reconnect policy, and TLS plumbing.

pub mod backoff;
pub mod error;
pub mod protocol;
pub mod tls;

pub use backoff::ReconnectPolicy;
pub use error::{Error, Result};
pub use protocol::{MessageData, WireMessage};
