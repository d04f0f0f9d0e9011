//! TCP transport for the extension protocol.
//!
//! # Architecture
//!
//! ```text
//! Bridge::listen()
//! ┌──────────────────┐   one task per   ┌──────────────────┐
//! │ SocketServer     │───connection────►│ ClientConn       │
//! │  TcpListener     │                  │  read chunk      │
//! │  accept loop     │                  │  policy? → XML   │
//! └──────────────────┘                  │  JSON → dispatch │
//!                                       └────────┬─────────┘
//!                                                │ tables, events
//!                                                ▼
//!                                             Bridge
//! ```
//!
//! See [`framing`] for the wire formats.

pub mod client_conn;
pub mod framing;
pub mod server;
