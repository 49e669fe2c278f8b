//! Reconnecting WebSocket client
//!
//! This module provides `ResockClient`, which keeps one WebSocket to the
//! backend alive and fans inbound messages out to registered handlers.
//!
//! # Client Lifecycle
//!
//! 1. **Construct**: `ResockClient::new(config)` validates the config and
//!    spawns the driver task. Nothing is opened yet.
//! 2. **Connect**: `connect()` returns immediately; watch `state_changes()` to
//!    see `Open`.
//! 3. **Recover**: lost transports are reopened with exponential backoff until
//!    the attempt budget runs out (`Failed`).
//! 4. **Disconnect**: `disconnect()` closes the transport and cancels any
//!    pending retry. `connect()` may be called again later.
//!
//! # Driver
//!
//! All state lives in a single driver task. Caller commands, transport events
//! and retry timers are queued to it and processed one at a time, so
//! transitions never interleave and frames are dispatched in arrival order.
//!
//! # Cloning
//!
//! `ResockClient` is cheaply cloneable. All clones share the same driver. When
//! the last clone is dropped the driver closes the transport and exits.
//!
//! Handlers are owned by the driver, so a handler that keeps a strong clone
//! keeps the driver alive with it. Handlers that need the client capture a
//! `WeakResockClient` from `downgrade()` instead.

use crate::config::ClientConfig;
use crate::connection_state::{ConnectionMachine, Effect, Event, Generation};
use crate::dispatch::{DispatchRegistry, HandlerId, HandlerResult, MessageHandler};
use crate::metrics::ClientMetrics;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use resock_core::{codec, ConnectionState, Error, Message, Result};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound on waiting for a close handshake write
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Requests from client handles to the driver
enum Command {
    Connect,
    Disconnect,
    Send(String),
}

/// Notifications from transport and timer tasks to the driver
enum TransportEvent {
    Opened {
        generation: Generation,
        sink: WsSink,
    },
    Frame {
        generation: Generation,
        text: String,
    },
    Closed {
        generation: Generation,
        reason: String,
    },
    Errored {
        generation: Generation,
        cause: String,
    },
    RetryElapsed {
        generation: Generation,
    },
}

struct Shared {
    config: ClientConfig,
    registry: DispatchRegistry,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    error_tx: broadcast::Sender<Error>,
}

/// Reconnecting pub/sub WebSocket client
#[derive(Clone)]
pub struct ResockClient {
    inner: Arc<Shared>,
}

impl ResockClient {
    /// Create a client and spawn its driver task
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the endpoint or retry policy is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_metrics(config, None)
    }

    pub(crate) fn with_metrics(
        config: ClientConfig,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (error_tx, _) = broadcast::channel(config.error_buffer());
        let registry = DispatchRegistry::new();

        let driver = Driver {
            machine: ConnectionMachine::new(config.clone()),
            endpoint: config.endpoint().to_string(),
            registry: registry.clone(),
            state_tx,
            error_tx: error_tx.clone(),
            metrics,
            events: event_tx,
            sink: None,
            transport_task: None,
            reconnect_task: None,
        };
        tokio::spawn(driver.run(command_rx, event_rx));

        tracing::debug!(endpoint = %config.endpoint(), "Client created");

        Ok(Self {
            inner: Arc::new(Shared {
                config,
                registry,
                commands: command_tx,
                state_rx,
                error_tx,
            }),
        })
    }

    /// The configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Start connecting
    ///
    /// Returns as soon as the attempt is initiated. A no-op while already
    /// connecting or open. From any other state, starts a fresh retry cycle.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the endpoint is malformed (not retried)
    /// - `Error::Closed` if the driver has stopped
    pub fn connect(&self) -> Result<()> {
        self.inner.config.validate()?;
        self.command(Command::Connect)
    }

    /// Close the transport and cancel any pending reconnect
    ///
    /// The close that follows does not trigger a reconnect. Idempotent.
    pub fn disconnect(&self) {
        if self.command(Command::Disconnect).is_err() {
            tracing::debug!("Disconnect after driver stopped");
        }
    }

    /// Serialize `message` and send it as a text frame
    ///
    /// Nothing is queued: a message sent outside the `Open` state is dropped.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` unless the state is `Open`
    /// - `Error::Serialization` if `message` can't be encoded
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let state = self.state();
        if !state.is_open() {
            return Err(Error::NotConnected { state });
        }

        let text = codec::encode(message)?;
        self.command(Command::Send(text))
    }

    /// A handle that doesn't keep the driver alive
    ///
    /// Use this to reach the client from inside a handler.
    pub fn downgrade(&self) -> WeakResockClient {
        WeakResockClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a handler for all subsequent messages
    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        self.inner.registry.add_handler(handler)
    }

    /// Register a closure as a handler
    pub fn add_fn<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.registry.add_fn(handler)
    }

    /// Deregister a handler. Returns `false` if it wasn't registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.registry.remove_handler(id)
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Whether the connection is open
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Subscribe to state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Subscribe to transport, decode and handler failures
    pub fn errors(&self) -> broadcast::Receiver<Error> {
        self.inner.error_tx.subscribe()
    }

    /// Wait until the state satisfies `predicate`, up to `timeout`
    ///
    /// Returns the matching state, or `None` on timeout.
    pub async fn wait_for_state<F>(&self, predicate: F, timeout: Duration) -> Option<ConnectionState>
    where
        F: Fn(ConnectionState) -> bool,
    {
        let mut rx = self.state_changes();
        let result = tokio::time::timeout(timeout, rx.wait_for(|state| predicate(*state))).await;
        match result {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.inner.commands.send(command).map_err(|_| Error::Closed)
    }
}

/// Non-owning handle to a `ResockClient`
///
/// Upgrading fails once every `ResockClient` clone has been dropped.
#[derive(Clone)]
pub struct WeakResockClient {
    inner: Weak<Shared>,
}

impl WeakResockClient {
    /// Recover a full handle if the client is still alive
    pub fn upgrade(&self) -> Option<ResockClient> {
        self.inner.upgrade().map(|inner| ResockClient { inner })
    }
}

impl std::fmt::Debug for WeakResockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakResockClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl std::fmt::Debug for ResockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResockClient")
            .field("endpoint", &self.inner.config.endpoint())
            .field("state", &self.state())
            .field("handlers", &self.inner.registry.len())
            .finish()
    }
}

/// Owns the state machine and executes its effects
struct Driver {
    machine: ConnectionMachine,
    endpoint: String,
    registry: DispatchRegistry,
    state_tx: watch::Sender<ConnectionState>,
    error_tx: broadcast::Sender<Error>,
    metrics: Option<Arc<ClientMetrics>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    sink: Option<WsSink>,
    transport_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = events.recv() => self.on_transport_event(event).await,
            }
        }

        tracing::debug!(endpoint = %self.endpoint, "All client handles dropped, stopping driver");
        self.cancel_reconnect();
        self.close_transport().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.apply(Event::Connect).await,
            Command::Disconnect => self.apply(Event::Disconnect).await,
            Command::Send(text) => self.write(text).await,
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        let event = match event {
            TransportEvent::Opened { generation, sink } => {
                if generation == self.machine.generation() {
                    self.sink = Some(sink);
                }
                Event::Opened { generation }
            }
            TransportEvent::Frame { generation, text } => Event::MessageReceived {
                generation,
                payload: text,
            },
            TransportEvent::Closed { generation, reason } => Event::Closed { generation, reason },
            TransportEvent::Errored { generation, cause } => Event::Errored { generation, cause },
            TransportEvent::RetryElapsed { generation } => Event::RetryElapsed { generation },
        };
        self.apply(event).await;
    }

    async fn apply(&mut self, event: Event) {
        match self.machine.handle(event) {
            Ok(effects) => {
                for effect in effects {
                    self.execute(effect).await;
                }
            }
            Err(error) => {
                tracing::error!(error = %error, endpoint = %self.endpoint, "Connect rejected");
                self.emit_error(error);
            }
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StateChanged(state) => {
                tracing::info!(state = %state, endpoint = %self.endpoint, "Connection state changed");
                if let Some(ref m) = self.metrics {
                    m.update_connection_state(state);
                }
                self.state_tx.send_replace(state);
            }
            Effect::OpenTransport { generation } => {
                // At most one transport: anything left over is released first
                self.close_transport().await;
                tracing::info!(generation, endpoint = %self.endpoint, "Opening transport");
                self.transport_task = Some(tokio::spawn(run_transport(
                    self.endpoint.clone(),
                    generation,
                    self.events.clone(),
                )));
            }
            Effect::CloseTransport => self.close_transport().await,
            Effect::ScheduleReconnect {
                generation,
                delay,
                attempt,
            } => {
                tracing::info!(
                    attempt,
                    max_attempts = self.machine.config().max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting"
                );
                if let Some(ref m) = self.metrics {
                    m.record_reconnection_attempt(attempt);
                }
                self.cancel_reconnect();
                let events = self.events.clone();
                self.reconnect_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(TransportEvent::RetryElapsed { generation });
                }));
            }
            Effect::CancelReconnect => self.cancel_reconnect(),
            Effect::Dispatch(message) => {
                if let Some(ref m) = self.metrics {
                    m.record_message_received();
                }
                let report = self.registry.dispatch(&message);
                for failure in report.failures {
                    tracing::warn!(handler = %failure.handler, error = %failure.error, "Handler failed");
                    self.emit_error(Error::Handler(format!(
                        "{}: {}",
                        failure.handler, failure.error
                    )));
                }
            }
            Effect::EmitError(error) => {
                if let Error::Decode(_) = error {
                    tracing::warn!(error = %error, "Dropping inbound frame");
                }
                self.emit_error(error);
            }
        }
    }

    async fn write(&mut self, text: String) {
        let state = self.machine.state();
        let Some(sink) = self.sink.as_mut().filter(|_| state.is_open()) else {
            tracing::warn!(state = %state, "Connection lost before send, dropping message");
            return;
        };

        match sink.send(WsMessage::Text(text)).await {
            Ok(()) => {
                if let Some(ref m) = self.metrics {
                    m.record_message_sent();
                }
            }
            Err(e) => {
                // The reader task sees the same failure and reports it
                tracing::warn!(error = %e, "Failed to send frame");
                if let Some(ref m) = self.metrics {
                    m.record_error("transport");
                }
            }
        }
    }

    fn emit_error(&self, error: Error) {
        if let Some(ref m) = self.metrics {
            m.record_error(error.kind());
        }
        // No subscribers is fine
        let _ = self.error_tx.send(error);
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    async fn close_transport(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let close = async {
                sink.send(WsMessage::Close(None)).await?;
                sink.close().await
            };
            match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
                Ok(Ok(())) => tracing::debug!("Transport closed"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Transport already gone"),
                Err(_) => tracing::warn!("Timed out closing transport"),
            }
        }
        if let Some(task) = self.transport_task.take() {
            task.abort();
        }
    }
}

/// Open one transport and forward its events until it ends
async fn run_transport(
    endpoint: String,
    generation: Generation,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let stream = match connect_async(endpoint.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Errored {
                generation,
                cause: e.to_string(),
            });
            return;
        }
    };

    let (sink, mut stream) = stream.split();
    if events.send(TransportEvent::Opened { generation, sink }).is_err() {
        return;
    }

    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(WsMessage::Text(text)) => TransportEvent::Frame { generation, text },
            Ok(WsMessage::Close(frame)) => TransportEvent::Closed {
                generation,
                reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
            },
            Ok(WsMessage::Binary(bytes)) => {
                tracing::debug!(len = bytes.len(), "Ignoring binary frame");
                continue;
            }
            // Pings are answered by tungstenite
            Ok(_) => continue,
            Err(e) => TransportEvent::Errored {
                generation,
                cause: e.to_string(),
            },
        };

        let terminal = !matches!(event, TransportEvent::Frame { .. });
        if events.send(event).is_err() || terminal {
            return;
        }
    }

    let _ = events.send(TransportEvent::Closed {
        generation,
        reason: "stream ended".to_string(),
    });
}
