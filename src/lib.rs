//! resock - Reconnecting pub/sub socket client
//!
//! This is the convenience crate that re-exports the resock sub-crates.
//! Use it if you want a single dependency for the whole client.
//!
//! # Architecture
//!
//! resock is organized into modular crates:
//!
//! - **resock-core**: Message and state types, codec, error handling, observability
//! - **resock-client**: WebSocket client with reconnection and handler fan-out
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use resock::{ClientBuilder, ConnectionState};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("ws://localhost:8000/ws").connect()?;
//!
//!     client.add_fn(|message| {
//!         println!("Result: {}", message);
//!         Ok(())
//!     });
//!
//!     client
//!         .wait_for_state(ConnectionState::is_open, Duration::from_secs(5))
//!         .await;
//!     client.send(&serde_json::json!({"query": "red bicycle"}))?;
//!
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates so everything is reachable through `resock::`
pub use resock_client as client;
pub use resock_core as core;

// Convenience re-exports of the most commonly used types
pub use resock_client::{ClientBuilder, ClientConfig, ResockClient};
pub use resock_core::{ConnectionState, Error, Message, Result};
