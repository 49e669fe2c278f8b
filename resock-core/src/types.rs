//! Shared value types
//!
//! The client treats frame payloads as opaque structured values: it encodes
//! whatever the caller hands to `send` and decodes whatever arrives, without
//! imposing a schema. Handlers receive the decoded value as-is.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A decoded inbound message or an outbound payload
///
/// Frames are JSON text on the wire, so the structured value is a
/// `serde_json::Value`. Callers that expect a fixed envelope can
/// deserialize further with `serde_json::from_value`.
pub type Message = serde_json::Value;

/// Lifecycle state of a client connection
///
/// Exactly one of these holds for a client at any time. Only the connection
/// state machine moves between them.
///
/// ```text
/// Idle → Connecting → Open → Closing → Idle
///           ↓           ↓
///        Reconnecting ←─┘
///           ↓
///         Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport and no reconnect pending
    Idle,
    /// A transport open is in flight
    Connecting,
    /// The transport is open and frames flow both ways
    Open,
    /// A caller-requested close is in progress
    Closing,
    /// The transport was lost and a reconnect is scheduled
    Reconnecting,
    /// The retry budget is exhausted; only an explicit connect leaves this state
    Failed,
}

impl ConnectionState {
    /// Whether the client may transmit frames in this state
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether a transport attempt is live or already established
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }

    /// Numeric code used for the connection state gauge
    pub fn as_code(self) -> i64 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
            ConnectionState::Closing => 5,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
