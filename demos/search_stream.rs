//! Demo of a search UI's live result stream
//!
//! Connects to the search backend, prints every message it pushes and sends a
//! query every few seconds. Stop and restart the backend to watch the client
//! back off and reconnect.
//!
//! Start the backend (it listens on `ws://localhost:8000/ws`), then run:
//! ```bash
//! RUST_LOG=info cargo run --example search_stream
//! ```
//!
//! Pass a different endpoint as the first argument if needed.

use resock::core::ObservabilityConfig;
use resock::{ClientBuilder, ConnectionState};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| resock::client::DEFAULT_ENDPOINT.to_string());

    let client = ClientBuilder::new(&endpoint)
        .max_attempts(5)
        .initial_delay(Duration::from_secs(1))
        .max_delay(Duration::from_secs(30))
        .with_observability(ObservabilityConfig::new("search-stream").with_log_level("info"))
        .connect()?;

    client.add_fn(|message| {
        match message.get("status").and_then(|s| s.as_str()) {
            Some(status) => println!("[{status}] {}", message["message"]),
            None => println!("{message}"),
        }
        Ok(())
    });

    let mut errors = client.errors();
    tokio::spawn(async move {
        while let Ok(error) = errors.recv().await {
            eprintln!("error: {error}");
        }
    });

    let mut states = client.state_changes();
    let monitor = client.clone();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("connection: {state}");
            if state == ConnectionState::Failed {
                println!("giving up; reconnecting from scratch in 10s");
                tokio::time::sleep(Duration::from_secs(10)).await;
                let _ = monitor.connect();
            }
        }
    });

    let queries = ["red bicycle", "mountain tent", "espresso grinder"];
    let mut ticker = tokio::time::interval(Duration::from_secs(3));
    for query in queries.iter().cycle() {
        ticker.tick().await;
        match client.send(&json!({ "query": query })) {
            Ok(()) => println!("sent: {query}"),
            Err(e) => println!("skipped {query:?}: {e}"),
        }
    }

    Ok(())
}
