//! Client configuration
//!
//! `ClientConfig` holds the endpoint and the retry policy. It is immutable once
//! handed to a client; build it with the `with_*` methods first.
//!
//! # Examples
//!
//! ```rust
//! use resock_client::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("ws://localhost:8000/ws")
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(500))
//!     .with_max_delay(Duration::from_secs(4));
//!
//! assert!(config.validate().is_ok());
//! ```

use resock_core::{Error, Result};
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

/// Endpoint of the search backend's socket route
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";

/// Reconnect attempts allowed after a failure before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect attempt
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound on the delay between reconnect attempts
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Capacity of the error event channel
pub const DEFAULT_ERROR_BUFFER: usize = 64;

/// Connection and retry policy for a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    endpoint: String,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    error_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl ClientConfig {
    /// Create a configuration for `endpoint` with the default retry policy
    ///
    /// The endpoint isn't checked here; `validate` (called by the client on
    /// construction and on every `connect`) rejects malformed values.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: false,
            error_buffer: DEFAULT_ERROR_BUFFER,
        }
    }

    /// Set how many reconnects are attempted before the client gives up
    ///
    /// Zero disables reconnection: the first failure moves straight to `Failed`.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first reconnect attempt
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap on the delay between attempts
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Add a random 0-25% to each delay, still capped at `max_delay`
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Set the capacity of the error event channel
    ///
    /// Slow subscribers that fall further behind than this miss events.
    pub fn with_error_buffer(mut self, capacity: usize) -> Self {
        self.error_buffer = capacity;
        self
    }

    /// The WebSocket endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Maximum reconnect attempts per failure cycle
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first reconnect attempt
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Cap on the delay between attempts
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether delays are jittered
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Capacity of the error event channel
    pub fn error_buffer(&self) -> usize {
        self.error_buffer
    }

    /// Check the endpoint and retry policy
    ///
    /// # Errors
    ///
    /// `Error::Config` if the endpoint is not a `ws://` or `wss://` URI with a
    /// host, if either delay is zero, if the initial delay exceeds the maximum,
    /// or if the error buffer is empty.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.endpoint)?;

        if self.initial_delay.is_zero() {
            return Err(Error::Config("initial delay must be positive".to_string()));
        }
        if self.max_delay.is_zero() {
            return Err(Error::Config("max delay must be positive".to_string()));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::Config(format!(
                "initial delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        if self.error_buffer == 0 {
            return Err(Error::Config("error buffer must hold at least one event".to_string()));
        }

        Ok(())
    }
}

/// Check that `endpoint` is a well-formed WebSocket URI
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| Error::Config(format!("invalid endpoint {endpoint:?}: {e}")))?;

    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        Some(other) => {
            return Err(Error::Config(format!(
                "unsupported scheme {other:?} in {endpoint:?}, expected ws or wss"
            )))
        }
        None => return Err(Error::Config(format!("endpoint {endpoint:?} has no scheme"))),
    }

    match uri.host() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(Error::Config(format!("endpoint {endpoint:?} has no host"))),
    }
}
