//! Error types for resock
//!
//! Failures fall into a small taxonomy, and each category has a fixed
//! propagation rule:
//!
//! - **Config**: malformed endpoint or retry policy. Returned to the caller
//!   of `connect`, never retried.
//! - **Transport**: open failure, unexpected close or network error. Recovered
//!   by the backoff policy and surfaced as a state change, not returned.
//! - **Decode**: an inbound frame that isn't valid JSON. The frame is dropped
//!   and the failure goes to the error stream.
//! - **NotConnected**: `send` outside the `Open` state. Returned synchronously.
//! - **Handler**: a registered handler failed. Isolated and reported on the
//!   error stream.
//!
//! # Examples
//!
//! ```rust
//! use resock_core::{ConnectionState, Error};
//!
//! let error = Error::NotConnected { state: ConnectionState::Reconnecting };
//! assert_eq!(error.to_string(), "Not connected (state: reconnecting)");
//! ```

use crate::types::ConnectionState;
use thiserror::Error;

/// Result type for resock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for resock operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The endpoint or retry policy is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport failed to open or was lost
    #[error("Transport error: {0}")]
    Transport(String),

    /// An inbound frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A send was attempted while the connection is not open
    ///
    /// The message is dropped. Nothing is queued for a later open.
    #[error("Not connected (state: {state})")]
    NotConnected {
        /// State the client was in when the send was rejected
        state: ConnectionState,
    },

    /// A registered handler returned an error or panicked
    #[error("Handler error: {0}")]
    Handler(String),

    /// An outbound value could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The client's driver task is gone
    #[error("Client closed")]
    Closed,
}

impl Error {
    /// Short label used for the `error_type` metric attribute
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Transport(_) => "transport",
            Error::Decode(_) => "decode",
            Error::NotConnected { .. } => "not_connected",
            Error::Handler(_) => "handler",
            Error::Serialization(_) => "serialization",
            Error::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Config("missing host".into()).to_string(),
            "Configuration error: missing host"
        );
        assert_eq!(
            Error::NotConnected {
                state: ConnectionState::Idle
            }
            .to_string(),
            "Not connected (state: idle)"
        );
        assert_eq!(Error::Closed.to_string(), "Client closed");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Decode("x".into()).kind(), "decode");
        assert_eq!(Error::Handler("x".into()).kind(), "handler");
        assert_eq!(
            Error::NotConnected {
                state: ConnectionState::Failed
            }
            .kind(),
            "not_connected"
        );
    }
}
