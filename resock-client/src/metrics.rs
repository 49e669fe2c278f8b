//! Client metrics definitions
//!
//! OpenTelemetry instruments for monitoring connection health. They are
//! recorded by the client's driver when metrics are enabled through
//! `ClientBuilder::with_metrics()` or `ClientBuilder::with_observability()`,
//! and exported by whatever meter provider is installed globally.
//!
//! # Metrics Collected
//!
//! - **resock.client.connection.state**: Current state code (gauge)
//! - **resock.client.reconnection.attempts**: Scheduled reconnects (counter)
//! - **resock.client.opens**: Successful transport opens (counter)
//! - **resock.client.messages.received**: Decoded inbound messages (counter)
//! - **resock.client.messages.sent**: Frames written to the transport (counter)
//! - **resock.client.errors.total**: Errors by `error_type` (counter)

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
    InstrumentationScope, KeyValue,
};
use resock_core::ConnectionState;

/// Client metrics for monitoring
pub struct ClientMetrics {
    /// Connection state (see `ConnectionState::as_code`)
    pub connection_state: Gauge<i64>,
    /// Total number of reconnects scheduled
    pub reconnection_attempts: Counter<u64>,
    /// Total number of successful opens
    pub opens_total: Counter<u64>,
    /// Total number of messages dispatched to handlers
    pub messages_received: Counter<u64>,
    /// Total number of frames sent
    pub messages_sent: Counter<u64>,
    /// Total number of errors
    pub errors_total: Counter<u64>,
}

impl ClientMetrics {
    /// Create metrics from the global meter provider under `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Create metrics from a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("resock.client.connection.state")
                .with_description(
                    "Connection state (0=idle, 1=connecting, 2=open, 3=reconnecting, 4=failed, 5=closing)",
                )
                .build(),
            reconnection_attempts: meter
                .u64_counter("resock.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts scheduled")
                .build(),
            opens_total: meter
                .u64_counter("resock.client.opens")
                .with_description("Total number of successful transport opens")
                .build(),
            messages_received: meter
                .u64_counter("resock.client.messages.received")
                .with_description("Total number of decoded inbound messages")
                .build(),
            messages_sent: meter
                .u64_counter("resock.client.messages.sent")
                .with_description("Total number of frames sent")
                .build(),
            errors_total: meter
                .u64_counter("resock.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
        }
    }

    /// Update connection state
    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_code(), &[]);
        if state == ConnectionState::Open {
            self.opens_total.add(1, &[]);
        }
    }

    /// Record a scheduled reconnect
    pub fn record_reconnection_attempt(&self, attempt: u32) {
        self.reconnection_attempts
            .add(1, &[KeyValue::new("attempt", i64::from(attempt))]);
    }

    /// Record a message delivered to handlers
    pub fn record_message_received(&self) {
        self.messages_received.add(1, &[]);
    }

    /// Record a frame written to the transport
    pub fn record_message_sent(&self) {
        self.messages_sent.add(1, &[]);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &str) {
        let attributes = &[KeyValue::new("error_type", error_type.to_string())];
        self.errors_total.add(1, attributes);
    }
}
