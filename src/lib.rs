//! Scratch Bridge - local TCP bridge for Scratch helper apps.
//!
//! Lets a visual-programming runtime call host functions and read host
//! variables over a loopback socket speaking newline-terminated JSON.
//!
//! # Modules
//!
//! - [`bridge`] - Shared method/variable tables, events, dispatch
//! - [`socket`] - Listener, per-connection loop, wire codec
//! - [`config`] - Configuration loading
//! - [`error`] - Protocol diagnostics

pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod socket;

// Re-export commonly used types
pub use bridge::events::{BridgeEvent, ConnectionId, EventKind, SubscriptionId};
pub use bridge::{args, Bridge, Dispatch};
pub use config::{BridgeConfig, Framing};
pub use error::BridgeError;
pub use socket::framing::CommandFrame;
pub use socket::server::SocketServer;
