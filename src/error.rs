//! Protocol diagnostics.
//!
//! Every failure that can happen while handling a client frame is one of the
//! [`BridgeError`] variants. None of them is fatal: the connection handler logs
//! the error, hands it to diagnostic subscribers and carries on with the next
//! frame. The remote peer never sees them.

use thiserror::Error;

/// A non-fatal problem encountered while serving a client.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Inbound bytes were not valid JSON.
    #[error("failed to parse frame {raw:?}: {source}")]
    Parse {
        /// The offending text, as received.
        raw: String,
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The frame named a method that is not registered, or was not a
    /// well-formed command frame at all.
    #[error("unknown method {method:?}")]
    UnknownMethod {
        /// The requested method name (or a rendering of the bad frame).
        method: String,
    },

    /// A registered handler returned an error or panicked.
    #[error("handler for {method:?} failed: {message}")]
    Handler {
        /// Method whose handler failed.
        method: String,
        /// Failure description.
        message: String,
    },

    /// A variable value could not be encoded during a poll snapshot.
    #[error("variable {name:?} could not be serialized: {source}")]
    Serialization {
        /// Variable name.
        name: String,
        /// Underlying encoder error.
        #[source]
        source: serde_json::Error,
    },

    /// Line framing gave up on a partial line that never ended.
    #[error("line exceeded {limit} bytes without a newline")]
    LineTooLong {
        /// Configured maximum line size.
        limit: usize,
    },
}

impl BridgeError {
    /// Short machine-readable kind, used as a log tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } | Self::LineTooLong { .. } => "parse_error",
            Self::UnknownMethod { .. } => "unknown_method",
            Self::Handler { .. } => "handler_error",
            Self::Serialization { .. } => "serialization_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            BridgeError::Parse { raw: "{".into(), source: parse }.kind(),
            "parse_error"
        );
        assert_eq!(BridgeError::LineTooLong { limit: 4 }.kind(), "parse_error");
        assert_eq!(
            BridgeError::UnknownMethod { method: "nope".into() }.kind(),
            "unknown_method"
        );
        assert_eq!(
            BridgeError::Handler { method: "write".into(), message: "boom".into() }.kind(),
            "handler_error"
        );
    }

    #[test]
    fn test_display_includes_method() {
        let err = BridgeError::UnknownMethod { method: "nope".into() };
        assert_eq!(err.to_string(), "unknown method \"nope\"");
    }
}
