//! Connection state machine
//!
//! Manages connection lifecycle and reconnection. Uses the effect pattern:
//! `handle` consumes one event and returns the effects for the driver to
//! execute (open a socket, arm a timer, dispatch a message). The machine does
//! no I/O and reads no clock, so every transition is testable without a socket.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ Connect ┌────────────┐ Opened ┌──────┐ Disconnect ┌─────────┐
//! │ Idle │────────>│ Connecting │───────>│ Open │───────────>│ Closing │──> Idle
//! └──────┘         └────────────┘        └──────┘            └─────────┘
//!                     ↑    │ Closed/Errored  │ Closed/Errored
//!        RetryElapsed │    ↓                 ↓
//!                  ┌──────────────┐  budget exhausted  ┌────────┐
//!                  │ Reconnecting │───────────────────>│ Failed │
//!                  └──────────────┘                    └────────┘
//! ```
//!
//! # Generations
//!
//! Every transport attempt and every scheduled retry carries a generation
//! number. The machine bumps it whenever it leaves an attempt behind
//! (disconnect, failure, new attempt), and drops any event whose generation
//! is not current. This is how a close caused by `disconnect` is told apart
//! from a transport failure, and how a late open or timer from a superseded
//! attempt is ignored.

use crate::config::ClientConfig;
use crate::reconnect::ExponentialBackoff;
use resock_core::{codec, ConnectionState, Error, Message, Result};
use std::time::Duration;

/// Identifies one transport attempt or one scheduled retry
pub type Generation = u64;

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller asked to connect
    Connect,
    /// Caller asked to disconnect
    Disconnect,
    /// The transport for `generation` finished its handshake
    Opened {
        /// Attempt that opened
        generation: Generation,
    },
    /// A text frame arrived on the transport for `generation`
    MessageReceived {
        /// Attempt the frame arrived on
        generation: Generation,
        /// Raw frame payload
        payload: String,
    },
    /// The transport for `generation` was closed by the peer or the network
    Closed {
        /// Attempt that closed
        generation: Generation,
        /// Close reason, if any
        reason: String,
    },
    /// The transport for `generation` failed to open or errored
    Errored {
        /// Attempt that failed
        generation: Generation,
        /// Description of the failure
        cause: String,
    },
    /// The backoff delay for the retry armed at `generation` elapsed
    RetryElapsed {
        /// Retry the timer belongs to
        generation: Generation,
    },
}

/// Actions returned by the state machine for the driver to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Publish the new state
    StateChanged(ConnectionState),
    /// Open a transport to the configured endpoint, tagged with `generation`
    OpenTransport {
        /// Tag for events coming from this transport
        generation: Generation,
    },
    /// Close and release the current transport, if any
    CloseTransport,
    /// Arm a timer that delivers `Event::RetryElapsed { generation }` after `delay`
    ScheduleReconnect {
        /// Tag for the timer event
        generation: Generation,
        /// How long to wait
        delay: Duration,
        /// Which attempt this is, starting at 1
        attempt: u32,
    },
    /// Disarm the pending reconnect timer, if any
    CancelReconnect,
    /// Deliver a decoded message to the handlers
    Dispatch(Message),
    /// Report a failure on the error stream (decode, handler or transport loss)
    EmitError(Error),
}

/// Connection lifecycle and retry policy
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    config: ClientConfig,
    backoff: ExponentialBackoff,
    generation: Generation,
}

impl ConnectionMachine {
    /// Create a machine in the `Idle` state
    pub fn new(config: ClientConfig) -> Self {
        let backoff = ExponentialBackoff::from_config(&config);
        Self {
            state: ConnectionState::Idle,
            config,
            backoff,
            generation: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current generation. Events tagged with any other value are ignored.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The configuration the machine was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Reconnect attempts used since the last successful open
    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Apply one event
    ///
    /// # Errors
    ///
    /// Only `Event::Connect` can fail, with `Error::Config` when the endpoint
    /// is malformed. The state is left unchanged in that case.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Effect>> {
        match event {
            Event::Connect => self.connect(),
            Event::Disconnect => Ok(self.disconnect()),
            Event::Opened { generation } => Ok(self.opened(generation)),
            Event::MessageReceived {
                generation,
                payload,
            } => Ok(self.message_received(generation, &payload)),
            Event::Closed { generation, reason } => {
                Ok(self.transport_lost(generation, "closed", &reason))
            }
            Event::Errored { generation, cause } => {
                Ok(self.transport_lost(generation, "errored", &cause))
            }
            Event::RetryElapsed { generation } => Ok(self.retry_elapsed(generation)),
        }
    }

    fn connect(&mut self) -> Result<Vec<Effect>> {
        if self.state.is_active() {
            return Ok(vec![]);
        }

        self.config.validate()?;

        let mut effects = Vec::new();
        if self.state == ConnectionState::Reconnecting {
            effects.push(Effect::CancelReconnect);
        }

        self.backoff.reset();
        effects.extend(self.begin_attempt());
        Ok(effects)
    }

    fn disconnect(&mut self) -> Vec<Effect> {
        let effects = match self.state {
            ConnectionState::Idle | ConnectionState::Closing => return vec![],
            ConnectionState::Connecting | ConnectionState::Open => vec![
                Effect::StateChanged(ConnectionState::Closing),
                Effect::CloseTransport,
                Effect::StateChanged(ConnectionState::Idle),
            ],
            ConnectionState::Reconnecting => vec![
                Effect::CancelReconnect,
                Effect::StateChanged(ConnectionState::Idle),
            ],
            ConnectionState::Failed => vec![Effect::StateChanged(ConnectionState::Idle)],
        };

        // Whatever the transport or timer reports next belongs to a finished cycle
        self.generation += 1;
        self.state = ConnectionState::Idle;
        effects
    }

    fn opened(&mut self, generation: Generation) -> Vec<Effect> {
        if generation != self.generation || self.state != ConnectionState::Connecting {
            tracing::debug!(generation, current = self.generation, "Ignoring stale open");
            return vec![];
        }

        self.backoff.reset();
        self.state = ConnectionState::Open;
        vec![Effect::StateChanged(ConnectionState::Open)]
    }

    fn message_received(&mut self, generation: Generation, payload: &str) -> Vec<Effect> {
        if generation != self.generation || self.state != ConnectionState::Open {
            return vec![];
        }

        match codec::decode(payload) {
            Ok(message) => vec![Effect::Dispatch(message)],
            Err(error) => vec![Effect::EmitError(error)],
        }
    }

    fn transport_lost(&mut self, generation: Generation, how: &str, detail: &str) -> Vec<Effect> {
        if generation != self.generation || !self.state.is_active() {
            tracing::debug!(generation, current = self.generation, how, "Ignoring stale transport event");
            return vec![];
        }

        tracing::warn!(generation, how, detail, state = %self.state, "Transport lost");
        self.generation += 1;

        let mut effects = vec![Effect::CloseTransport];
        match self.backoff.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                effects.push(Effect::StateChanged(ConnectionState::Reconnecting));
                effects.push(Effect::ScheduleReconnect {
                    generation: self.generation,
                    delay,
                    attempt: self.backoff.attempt(),
                });
            }
            None => {
                self.state = ConnectionState::Failed;
                effects.push(Effect::StateChanged(ConnectionState::Failed));
            }
        }
        effects.push(Effect::EmitError(Error::Transport(format!("{how}: {detail}"))));
        effects
    }

    fn retry_elapsed(&mut self, generation: Generation) -> Vec<Effect> {
        if generation != self.generation || self.state != ConnectionState::Reconnecting {
            tracing::debug!(generation, current = self.generation, "Ignoring stale retry timer");
            return vec![];
        }

        self.begin_attempt()
    }

    fn begin_attempt(&mut self) -> Vec<Effect> {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        vec![
            Effect::StateChanged(ConnectionState::Connecting),
            Effect::OpenTransport {
                generation: self.generation,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn machine(max_attempts: u32, initial: u64, max: u64) -> ConnectionMachine {
        ConnectionMachine::new(
            ClientConfig::new("ws://127.0.0.1:9000/ws")
                .with_max_attempts(max_attempts)
                .with_initial_delay(ms(initial))
                .with_max_delay(ms(max)),
        )
    }

    fn open_generation(effects: &[Effect]) -> Option<Generation> {
        effects.iter().find_map(|e| match e {
            Effect::OpenTransport { generation } => Some(*generation),
            _ => None,
        })
    }

    fn scheduled(effects: &[Effect]) -> Option<(Generation, Duration)> {
        effects.iter().find_map(|e| match e {
            Effect::ScheduleReconnect {
                generation, delay, ..
            } => Some((*generation, *delay)),
            _ => None,
        })
    }

    /// Connect, then fail every attempt; returns the scheduled delays
    fn fail_until_exhausted(m: &mut ConnectionMachine) -> Vec<Duration> {
        let effects = m.handle(Event::Connect).unwrap();
        let mut attempt_gen = open_generation(&effects).unwrap();
        let mut delays = Vec::new();

        loop {
            let effects = m
                .handle(Event::Errored {
                    generation: attempt_gen,
                    cause: "connection refused".into(),
                })
                .unwrap();
            let Some((timer_gen, delay)) = scheduled(&effects) else {
                break;
            };
            delays.push(delay);
            let effects = m
                .handle(Event::RetryElapsed {
                    generation: timer_gen,
                })
                .unwrap();
            attempt_gen = open_generation(&effects).unwrap();
        }

        delays
    }

    #[test]
    fn test_connect_opens_transport() {
        let mut m = machine(5, 1000, 30_000);
        let effects = m.handle(Event::Connect).unwrap();

        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(
            effects,
            vec![
                Effect::StateChanged(ConnectionState::Connecting),
                Effect::OpenTransport { generation: 1 },
            ]
        );

        let effects = m.handle(Event::Opened { generation: 1 }).unwrap();
        assert_eq!(m.state(), ConnectionState::Open);
        assert_eq!(effects, vec![Effect::StateChanged(ConnectionState::Open)]);
    }

    #[test]
    fn test_connect_is_noop_when_active() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        assert!(m.handle(Event::Connect).unwrap().is_empty());

        m.handle(Event::Opened { generation: 1 }).unwrap();
        assert!(m.handle(Event::Connect).unwrap().is_empty());
        assert_eq!(m.generation(), 1);
    }

    #[test]
    fn test_malformed_endpoint_fails_fast() {
        let mut m = ConnectionMachine::new(ClientConfig::new("http://nope"));
        let err = m.handle(Event::Connect).unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_scenario_three_attempts_capped_at_four_seconds() {
        let mut m = machine(3, 1000, 4000);
        let delays = fail_until_exhausted(&mut m);

        assert_eq!(delays, vec![ms(1000), ms(2000), ms(4000)]);
        assert_eq!(m.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_nth_delay_is_clamped_power_of_two() {
        let mut m = machine(7, 100, 1500);
        let delays = fail_until_exhausted(&mut m);

        let expected: Vec<Duration> = (1..=7u32)
            .map(|n| ms(100).saturating_mul(2u32.pow(n - 1)).min(ms(1500)))
            .collect();
        assert_eq!(delays, expected);
    }

    #[test]
    fn test_failed_issues_no_further_attempts() {
        let mut m = machine(2, 10, 100);
        fail_until_exhausted(&mut m);
        assert_eq!(m.state(), ConnectionState::Failed);

        // Nothing revives the client except an explicit connect
        let current = m.generation();
        assert!(m
            .handle(Event::RetryElapsed {
                generation: current
            })
            .unwrap()
            .is_empty());
        assert!(m
            .handle(Event::Closed {
                generation: current,
                reason: String::new()
            })
            .unwrap()
            .is_empty());
        assert_eq!(m.state(), ConnectionState::Failed);

        // A new connect starts a fresh cycle with the full budget
        let delays = fail_until_exhausted(&mut m);
        assert_eq!(delays, vec![ms(10), ms(20)]);
    }

    #[test]
    fn test_success_resets_backoff() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Opened { generation: 1 }).unwrap();

        let effects = m
            .handle(Event::Closed {
                generation: 1,
                reason: "going away".into(),
            })
            .unwrap();
        let (timer, first_delay) = scheduled(&effects).unwrap();
        assert_eq!(first_delay, ms(1000));

        let effects = m.handle(Event::RetryElapsed { generation: timer }).unwrap();
        let reopened = open_generation(&effects).unwrap();
        m.handle(Event::Opened {
            generation: reopened,
        })
        .unwrap();
        assert_eq!(m.attempt(), 0);

        let effects = m
            .handle(Event::Closed {
                generation: reopened,
                reason: "going away".into(),
            })
            .unwrap();
        let (_, second_delay) = scheduled(&effects).unwrap();
        assert_eq!(second_delay, first_delay);
    }

    #[test]
    fn test_scheduling_does_not_reset_backoff() {
        let mut m = machine(5, 100, 10_000);
        m.handle(Event::Connect).unwrap();

        let effects = m
            .handle(Event::Errored {
                generation: 1,
                cause: "refused".into(),
            })
            .unwrap();
        let (timer, _) = scheduled(&effects).unwrap();
        let effects = m.handle(Event::RetryElapsed { generation: timer }).unwrap();
        let attempt = open_generation(&effects).unwrap();

        let effects = m
            .handle(Event::Errored {
                generation: attempt,
                cause: "refused".into(),
            })
            .unwrap();
        assert_eq!(scheduled(&effects).map(|(_, d)| d), Some(ms(200)));
    }

    #[test]
    fn test_disconnect_while_reconnecting_cancels_retry() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        let effects = m
            .handle(Event::Errored {
                generation: 1,
                cause: "refused".into(),
            })
            .unwrap();
        let (timer, _) = scheduled(&effects).unwrap();
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        let effects = m.handle(Event::Disconnect).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::CancelReconnect,
                Effect::StateChanged(ConnectionState::Idle),
            ]
        );

        // A timer that fires anyway must not start an attempt
        let effects = m.handle(Event::RetryElapsed { generation: timer }).unwrap();
        assert!(effects.is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_disconnect_suppresses_reconnect_on_resulting_close() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Opened { generation: 1 }).unwrap();

        let effects = m.handle(Event::Disconnect).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::StateChanged(ConnectionState::Closing),
                Effect::CloseTransport,
                Effect::StateChanged(ConnectionState::Idle),
            ]
        );

        let effects = m
            .handle(Event::Closed {
                generation: 1,
                reason: "normal closure".into(),
            })
            .unwrap();
        assert!(effects.is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_late_open_after_disconnect_is_ignored() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Disconnect).unwrap();

        assert!(m.handle(Event::Opened { generation: 1 }).unwrap().is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut m = machine(5, 1000, 30_000);
        assert!(m.handle(Event::Disconnect).unwrap().is_empty());

        m.handle(Event::Connect).unwrap();
        m.handle(Event::Disconnect).unwrap();
        assert!(m.handle(Event::Disconnect).unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_from_failed_returns_to_idle() {
        let mut m = machine(0, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Errored {
            generation: 1,
            cause: "refused".into(),
        })
        .unwrap();
        assert_eq!(m.state(), ConnectionState::Failed);

        let effects = m.handle(Event::Disconnect).unwrap();
        assert_eq!(effects, vec![Effect::StateChanged(ConnectionState::Idle)]);
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_connect_while_reconnecting_restarts_cycle() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        let effects = m
            .handle(Event::Errored {
                generation: 1,
                cause: "refused".into(),
            })
            .unwrap();
        let (timer, _) = scheduled(&effects).unwrap();

        let effects = m.handle(Event::Connect).unwrap();
        assert_eq!(effects[0], Effect::CancelReconnect);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.attempt(), 0);

        // The superseded timer can't start a second transport
        assert!(m
            .handle(Event::RetryElapsed { generation: timer })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_error_then_close_counts_one_failure() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Opened { generation: 1 }).unwrap();

        m.handle(Event::Errored {
            generation: 1,
            cause: "reset by peer".into(),
        })
        .unwrap();
        let effects = m
            .handle(Event::Closed {
                generation: 1,
                reason: String::new(),
            })
            .unwrap();

        assert!(effects.is_empty());
        assert_eq!(m.attempt(), 1);
    }

    #[test]
    fn test_message_dispatch_and_decode_failure() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Opened { generation: 1 }).unwrap();

        let effects = m
            .handle(Event::MessageReceived {
                generation: 1,
                payload: r#"{"status":"received"}"#.into(),
            })
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::Dispatch(json!({"status": "received"}))]
        );

        let effects = m
            .handle(Event::MessageReceived {
                generation: 1,
                payload: "{truncated".into(),
            })
            .unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::EmitError(Error::Decode(_))));
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_messages_from_stale_transport_are_dropped() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Opened { generation: 1 }).unwrap();
        m.handle(Event::Disconnect).unwrap();
        m.handle(Event::Connect).unwrap();

        let effects = m
            .handle(Event::MessageReceived {
                generation: 1,
                payload: "{}".into(),
            })
            .unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn test_zero_attempts_fails_on_first_loss() {
        let mut m = machine(0, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        let effects = m
            .handle(Event::Errored {
                generation: 1,
                cause: "refused".into(),
            })
            .unwrap();

        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::StateChanged(ConnectionState::Failed),
                Effect::EmitError(Error::Transport("errored: refused".into())),
            ]
        );
    }

    #[test]
    fn test_transport_loss_is_reported() {
        let mut m = machine(5, 1000, 30_000);
        m.handle(Event::Connect).unwrap();
        m.handle(Event::Opened { generation: 1 }).unwrap();

        let effects = m
            .handle(Event::Closed {
                generation: 1,
                reason: "going away".into(),
            })
            .unwrap();
        assert_eq!(
            effects.last(),
            Some(&Effect::EmitError(Error::Transport(
                "closed: going away".into()
            )))
        );

        // A stale loss reports nothing
        let effects = m
            .handle(Event::Errored {
                generation: 1,
                cause: "reset".into(),
            })
            .unwrap();
        assert!(effects.is_empty());
    }
}
