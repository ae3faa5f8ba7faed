//! Reconnect Backoff Policy
//!
//! Capped exponential backoff with jitter for transport-level stream
//! failures. Heartbeat staleness does not go through this policy: a stale
//! restart resets the streak instead of growing it.

use std::time::Duration;

use rand::Rng;

/// Configuration for transport backoff behavior.
#[derive(Debug, Clone)]
pub struct BackoffSettings {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential growth.
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Stateful backoff calculator. Retries are unlimited; the cap bounds the
/// delay, not the attempt count.
#[derive(Debug)]
pub struct BackoffPolicy {
    settings: BackoffSettings,
    current_delay: Duration,
    streak: u32,
}

impl BackoffPolicy {
    /// Create a policy from settings.
    #[must_use]
    pub const fn new(settings: BackoffSettings) -> Self {
        let initial = settings.initial_delay;
        Self {
            settings,
            current_delay: initial,
            streak: 0,
        }
    }

    /// Get the delay to apply before the next retry, growing the streak.
    pub fn next_delay(&mut self) -> Duration {
        self.streak = self.streak.saturating_add(1);

        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.settings.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u64
            }
        } else {
            0
        };
        let max_millis = u64::try_from(self.settings.max_delay.as_millis()).unwrap_or(u64::MAX);
        self.current_delay = Duration::from_millis(next_millis.min(max_millis));

        delay
    }

    /// Reset after a successful reconnect (or a stale restart, which is not
    /// a transport failure).
    pub const fn reset(&mut self) {
        self.current_delay = self.settings.initial_delay;
        self.streak = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.settings.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.settings.jitter_factor;
        let mut rng = rand::thread_rng();
        let jitter: f64 = rng.gen_range(-jitter_range..=jitter_range);
        let adjusted = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted as u64)
    }
}
