//! Reconnect backoff for the connection manager.
//!
//! The first connection attempt for a fresh or recovered connection is
//! immediate. Each further attempt waits `base_delay * multiplier^n`,
//! capped at `max_delay`, until a connection succeeds and the sequence
//! resets.
//!
//! With the defaults the waits are 0s, 1s, 2s, 4s, ... up to the socket
//! timeout.

use std::time::Duration;

/// Default reconnect settings.
pub mod defaults {
    use std::time::Duration;

    /// Delay before the second connection attempt.
    pub const BASE_DELAY: Duration = Duration::from_secs(1);

    /// Growth factor between attempts.
    pub const MULTIPLIER: f64 = 2.0;

    /// Jitter factor (0.0 means exact delays).
    pub const JITTER: f64 = 0.0;

    /// Cap used when the socket timeout is disabled.
    pub const MAX_DELAY: Duration = Duration::from_secs(30);
}

/// Configuration for reconnect backoff.
///
/// # Example
///
/// ```
/// use h1pipe_client::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::new()
///     .base_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(5))
///     .jitter(0.1);
/// assert!(policy.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Multiplier for exponential backoff. Must be >= 1.0.
    pub multiplier: f64,

    /// Jitter factor between 0.0 and 1.0.
    /// A value of 0.2 spreads each delay within +/- 20%.
    pub jitter: f64,

    /// Upper bound for a single delay. `None` means "use the socket timeout".
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: defaults::BASE_DELAY,
            multiplier: defaults::MULTIPLIER,
            jitter: defaults::JITTER,
            max_delay: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validate the policy configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(max) = self.max_delay {
            if self.base_delay > max {
                return Err("base_delay must not exceed max_delay");
            }
        }
        if !(self.multiplier >= 1.0) {
            return Err("multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// Create the backoff sequence, capping delays at `fallback_max` unless
    /// the policy sets its own cap. A zero fallback means
    /// [`defaults::MAX_DELAY`].
    pub fn backoff(&self, fallback_max: Duration) -> ReconnectBackoff {
        let fallback_max = if fallback_max.is_zero() {
            defaults::MAX_DELAY
        } else {
            fallback_max
        };
        let max_delay = self.max_delay.unwrap_or(fallback_max).max(self.base_delay);
        ReconnectBackoff {
            policy: self.clone(),
            max_delay,
            current_delay_secs: 0.0,
            attempts: 0,
        }
    }
}

/// Delay sequence between connection attempts.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    policy: ReconnectPolicy,
    max_delay: Duration,
    /// Current delay without jitter. Zero until the first attempt was made.
    current_delay_secs: f64,
    attempts: u32,
}

impl ReconnectBackoff {
    /// Forget previous failures. Called after a successful connect.
    pub fn reset(&mut self) {
        self.current_delay_secs = 0.0;
        self.attempts = 0;
    }

    /// Number of attempts handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt. Zero means connect now.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay_secs;
        let max = self.max_delay.as_secs_f64();

        self.current_delay_secs = if self.attempts == 0 {
            self.policy.base_delay.as_secs_f64()
        } else {
            (delay * self.policy.multiplier).min(max)
        };
        self.attempts += 1;

        if delay == 0.0 {
            return Duration::ZERO;
        }

        // delay * (1 + jitter * random(-1, 1))
        let jittered = if self.policy.jitter > 0.0 {
            let jitter_range = self.policy.jitter * 2.0;
            let random_factor = rand::random::<f64>() * jitter_range - self.policy.jitter;
            delay * (1.0 + random_factor)
        } else {
            delay
        };

        Duration::from_secs_f64(jittered.min(max).max(0.0))
    }
}
