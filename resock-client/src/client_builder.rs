//! Client builder for configuring retry policy and observability
//!
//! The `ClientBuilder` provides a fluent API for configuring the client
//! before it is created. It allows you to:
//! - Tune the reconnection policy (attempt budget, delays, jitter)
//! - Configure observability (OpenTelemetry, structured logs)
//! - Set service name for telemetry
//!
//! # Examples
//!
//! ```rust,no_run
//! use resock_client::ClientBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> resock_core::Result<()> {
//! // Custom retry policy
//! let client = ClientBuilder::new("ws://localhost:8000/ws")
//!     .max_attempts(10)
//!     .initial_delay(Duration::from_millis(200))
//!     .with_jitter()
//!     .connect()?;
//!
//! // With observability
//! let client2 = ClientBuilder::new("ws://localhost:8000/ws")
//!     .with_default_observability()
//!     .service_name("search-ui")
//!     .connect()?;
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::metrics::ClientMetrics;
use crate::ResockClient;
use resock_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a `ResockClient`
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    metrics: bool,
}

impl ClientBuilder {
    /// Create a new client builder with the default retry policy
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(endpoint))
    }

    /// Start from an existing configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            observability_config: None,
            service_name: None,
            metrics: false,
        }
    }

    /// Reconnect attempts allowed after a failure
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config = self.config.with_max_attempts(max_attempts);
        self
    }

    /// Delay before the first reconnect
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_initial_delay(delay);
        self
    }

    /// Upper bound on the reconnect delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_max_delay(delay);
        self
    }

    /// Add random jitter to reconnect delays
    pub fn with_jitter(mut self) -> Self {
        self.config = self.config.with_jitter();
        self
    }

    /// Capacity of the error broadcast channel
    pub fn error_buffer(mut self, capacity: usize) -> Self {
        self.config = self.config.with_error_buffer(capacity);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.metrics = config.enable_metrics;
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Record client metrics against the global meter provider
    ///
    /// Useful when the application installs its own provider instead of
    /// going through `with_observability`.
    pub fn with_metrics(mut self) -> Self {
        self.metrics = true;
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Create the client without connecting
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<ResockClient> {
        self.config.validate()?;

        let service_name = self
            .service_name
            .clone()
            .or_else(|| self.observability_config.as_ref().map(|c| c.service_name.clone()))
            .unwrap_or_else(|| "resock".to_string());

        // Initialize observability if configured
        if let Some(mut config) = self.observability_config {
            config.service_name = service_name.clone();
            resock_core::init_observability(config)
                .map_err(|e| Error::Config(format!("Failed to initialize observability: {}", e)))?;
        }

        let metrics = self
            .metrics
            .then(|| Arc::new(ClientMetrics::new(service_name)));

        ResockClient::with_metrics(self.config, metrics)
    }

    /// Create the client and start connecting
    pub fn connect(self) -> Result<ResockClient> {
        let client = self.build()?;
        tracing::info!(endpoint = %client.config().endpoint(), "Connecting to server");
        client.connect()?;
        Ok(client)
    }
}
