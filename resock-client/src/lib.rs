//! Reconnecting pub/sub client over WebSocket
//!
//! This crate keeps a single WebSocket to a backend alive, recovers from
//! transport loss with exponential backoff, and fans every inbound JSON
//! message out to a set of registered handlers.
//!
//! # Core Features
//!
//! - **Auto-Reconnection**: Exponential backoff with a bounded attempt budget
//! - **Fan-out**: Every decoded message reaches every registered handler
//! - **Fault isolation**: A failing or panicking handler never blocks the others
//! - **State observation**: Watch connection state transitions as they happen
//! - **Observability**: OpenTelemetry metrics and structured tracing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use resock_client::{ConnectionState, ResockClient, ClientConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ResockClient::new(ClientConfig::new("ws://localhost:8000/ws"))?;
//!
//!     client.add_fn(|message| {
//!         println!("Received: {}", message);
//!         Ok(())
//!     });
//!
//!     client.connect()?;
//!     client
//!         .wait_for_state(ConnectionState::is_open, Duration::from_secs(5))
//!         .await;
//!
//!     client.send(&json!({"query": "red bicycle"}))?;
//!     Ok(())
//! }
//! ```
//!
//! # Reconnection
//!
//! After an unexpected close the client waits `initial_delay`, doubling after
//! each failed attempt up to `max_delay`. When `max_attempts` reconnects have
//! failed in a row the state becomes `Failed` and only an explicit `connect()`
//! starts over. A successful open restores the full budget.

mod client;
mod client_builder;
mod config;
mod connection_state;
mod dispatch;
mod metrics;
mod reconnect;

pub use client::{ResockClient, WeakResockClient};
pub use client_builder::ClientBuilder;
pub use config::{
    validate_endpoint, ClientConfig, DEFAULT_ENDPOINT, DEFAULT_ERROR_BUFFER,
    DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use connection_state::{ConnectionMachine, Effect, Event, Generation};
pub use dispatch::{
    BoxError, DispatchRegistry, DispatchReport, HandlerFailure, HandlerId, HandlerResult,
    MessageHandler,
};
pub use metrics::ClientMetrics;
pub use reconnect::BACKOFF_MULTIPLIER;
pub use resock_core::{ConnectionState, Error, Message, Result};
