//! Application-wide constants for scratch-bridge.
//!
//! Centralizes the protocol literals and tuning values shared by the socket
//! layer and the dispatcher.
//!
//! # Categories
//!
//! - **Protocol**: method names and the policy sentinel
//! - **Network**: default port, buffer sizes
//! - **Timeouts**: write deadlines and accept back-off

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// Substring that marks a legacy cross-domain policy-file request.
pub const POLICY_REQUEST: &str = "<policy-file-request/>";

/// Method name of the variable poll request.
pub const POLL_METHOD: &str = "poll";

/// Older clients send this instead of `poll`.
pub const LEGACY_POLL_METHOD: &str = "update-poll";

/// Method name of the outbound snapshot frame.
pub const UPDATE_METHOD: &str = "update";

// ============================================================================
// Network
// ============================================================================

/// Port used when neither the config file nor the CLI names one.
pub const DEFAULT_PORT: u16 = 12345;

/// Address the listener binds to by default. The bridge is meant for
/// loopback use only.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Size of the per-connection read buffer.
///
/// In chunk framing each read is treated as one message, so this also caps
/// the size of a single inbound frame.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Largest partial line kept while waiting for a newline (line framing).
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// Default deadline for writing a reply to a client.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Back-off after a failed `accept()` before retrying.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
