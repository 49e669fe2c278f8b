//! Core types and codec for resock
//!
//! This crate provides the transport-agnostic foundation shared by the
//! resock client. It includes:
//!
//! - **Types**: The message value type and the connection state enum
//! - **Codec**: Encoding outbound values and decoding inbound text frames
//! - **Error handling**: The error taxonomy for connection and dispatch failures
//! - **Observability**: tracing-subscriber and OpenTelemetry bootstrap
//!
//! # Architecture
//!
//! The crate doesn't touch sockets. It only knows how frames map to values and
//! how failures are classified. The `resock-client` crate builds on top of it
//! to drive a WebSocket connection with automatic reconnection.
//!
//! # Example
//!
//! ```rust
//! use resock_core::codec;
//! use serde_json::json;
//!
//! let frame = codec::encode(&json!({"query": "red bicycle"})).unwrap();
//! let value = codec::decode(&frame).unwrap();
//! assert_eq!(value["query"], "red bicycle");
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

// Re-export the most commonly used types for convenience
pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{ConnectionState, Message};
