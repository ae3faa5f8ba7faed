//! Connection Health Bookkeeping
//!
//! Shared state the receive loop, the watchdog, and the rebuild path use to
//! decide when the connection is stale, how many transport errors are in the
//! current streak, and whether the persistent-failure alert has already been
//! sent.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

/// Health state for the single streaming connection.
///
/// Created at stream-client start; fields reset on successful reconnect.
#[derive(Debug)]
pub struct ConnectionHealth {
    /// When the last stream message arrived.
    last_message: RwLock<Instant>,
    /// When the last protocol operation (message, login, subscribe) succeeded.
    last_success: RwLock<Instant>,
    /// When the last restart (rebuild) began.
    last_restart: RwLock<Instant>,
    /// Consecutive transport errors since the last success.
    consecutive_errors: AtomicU32,
    /// Monotonic rebuild counter, used to detect racing restart triggers.
    restart_generation: AtomicU64,
    /// Start of the current continuous-failure window.
    failing_since: Mutex<Option<Instant>>,
    /// Whether the persistent-failure alert has been sent for this window.
    alerted: AtomicBool,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    /// Create health state anchored at now.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_message: RwLock::new(now),
            last_success: RwLock::new(now),
            last_restart: RwLock::new(now),
            consecutive_errors: AtomicU32::new(0),
            restart_generation: AtomicU64::new(0),
            failing_since: Mutex::new(None),
            alerted: AtomicBool::new(false),
        }
    }

    /// Record a successfully received stream message.
    pub fn record_message(&self) {
        let now = Instant::now();
        *self.last_message.write() = now;
        *self.last_success.write() = now;
        self.clear_failure_window();
    }

    /// Record a successful reconnect (login plus resubscription).
    pub fn record_recovered(&self) {
        *self.last_success.write() = Instant::now();
        self.clear_failure_window();
    }

    /// Record a transport error; returns the new streak length.
    pub fn record_error(&self) -> u32 {
        let mut failing = self.failing_since.lock();
        if failing.is_none() {
            *failing = Some(Instant::now());
        }
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset the error streak without clearing the failure window. Used by
    /// stale restarts, which are not transport failures.
    pub fn reset_errors(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }

    /// Current consecutive-error streak.
    #[must_use]
    pub fn error_streak(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Time since the last stream message.
    #[must_use]
    pub fn message_gap(&self) -> Duration {
        self.last_message.read().elapsed()
    }

    /// Whether the gap since the last message exceeds the stale threshold.
    #[must_use]
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.message_gap() > threshold
    }

    /// Whether enough time has passed since the last restart for another.
    #[must_use]
    pub fn restart_allowed(&self, cooldown: Duration) -> bool {
        self.last_restart.read().elapsed() >= cooldown
    }

    /// Mark the start of a restart; returns the new generation.
    pub fn note_restart(&self) -> u64 {
        *self.last_restart.write() = Instant::now();
        self.restart_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current restart generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.restart_generation.load(Ordering::SeqCst)
    }

    /// Whether the persistent-failure alert should fire: true exactly once
    /// per continuous-failure window longer than `after`.
    pub fn should_alert(&self, after: Duration) -> bool {
        let failing = self.failing_since.lock();
        match *failing {
            Some(since) if since.elapsed() >= after => !self.alerted.swap(true, Ordering::SeqCst),
            _ => false,
        }
    }

    fn clear_failure_window(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        *self.failing_since.lock() = None;
        self.alerted.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_message(&self, by: Duration) {
        let past = Instant::now().checked_sub(by).unwrap();
        *self.last_message.write() = past;
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_restart(&self, by: Duration) {
        let past = Instant::now().checked_sub(by).unwrap();
        *self.last_restart.write() = past;
    }
}
