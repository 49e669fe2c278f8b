//! Exponential backoff for reconnection
//!
//! Tracks how many reconnects have been attempted since the last successful
//! open and how long to wait before the next one. The delay sequence is
//! `initial, initial·2, initial·4, …` clamped at the maximum. Both the attempt
//! count and the delay return to baseline only on a successful open.

use crate::config::ClientConfig;
use std::time::Duration;

/// Growth factor applied to the delay after each failure
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Retry state owned by the connection state machine
#[derive(Debug, Clone)]
pub(crate) struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    jitter: bool,
    attempt: u32,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            jitter: false,
            attempt: 0,
            current_delay: initial_delay.min(max_delay),
        }
    }

    pub(crate) fn from_config(config: &ClientConfig) -> Self {
        let backoff = Self::new(
            config.initial_delay(),
            config.max_delay(),
            config.max_attempts(),
        );
        if config.jitter() {
            backoff.with_jitter()
        } else {
            backoff
        }
    }

    pub(crate) fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Attempts consumed since the last reset
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next attempt would wait, before jitter
    #[cfg(test)]
    pub(crate) fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Consume one attempt and return how long to wait before it
    ///
    /// Returns `None` once `max_attempts` have been used. The delay for the
    /// following failure is doubled here, so a scheduled attempt never resets it.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        self.attempt += 1;
        let delay = self.current_delay;
        self.current_delay = delay
            .saturating_mul(BACKOFF_MULTIPLIER)
            .min(self.max_delay);

        Some(self.apply_jitter(delay))
    }

    /// Return to baseline after a successful open or an explicit connect
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.initial_delay.min(self.max_delay);
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }

        use rand::Rng;
        let delay_ms = delay.as_millis() as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=(delay_ms / 4));
        (delay + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}
