//! Core Settings
//!
//! Plain settings structs with the production defaults. Loading them from a
//! file or the environment is the embedding application's concern.

use std::time::Duration;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::broker::retry::BackoffSettings;

/// Local time after which order monitoring shortens its timeout to react
/// faster near the close.
const LATE_DAY_CUTOFF: NaiveTime = match NaiveTime::from_hms_opt(15, 30, 0) {
    Some(time) => time,
    None => NaiveTime::MIN,
};

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// How long one receive call may wait for a message; elapsing is normal
    /// in an idle market.
    pub receive_timeout: Duration,
    /// Gap since the last message after which the connection counts as
    /// stalled.
    pub stale_after: Duration,
    /// Cadence of the stale watchdog.
    pub watchdog_interval: Duration,
    /// Minimum time between forced restarts.
    pub restart_cooldown: Duration,
    /// Continuous failure duration after which the single operator alert
    /// fires.
    pub failure_alert_after: Duration,
    /// Backoff applied to transport-error reconnects.
    pub backoff: BackoffSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
            watchdog_interval: Duration::from_secs(60),
            restart_cooldown: Duration::from_secs(60),
            failure_alert_after: Duration::from_secs(300),
            backoff: BackoffSettings::default(),
        }
    }
}

/// Order lifecycle settings.
#[derive(Debug, Clone)]
pub struct OrderSettings {
    /// Interval between order-status checks while monitoring.
    pub poll_interval: Duration,
    /// Inner tick bounding cooperative-cancellation latency.
    pub cancel_poll_interval: Duration,
    /// Per-attempt monitoring timeout during regular hours.
    pub monitor_timeout: Duration,
    /// Per-attempt monitoring timeout after the late-day cutoff.
    pub late_day_monitor_timeout: Duration,
    /// Local time at which the late-day timeout takes over.
    pub late_day_cutoff: NaiveTime,
    /// Cap on price-improvement attempts per session.
    pub max_attempts: u32,
    /// Default price step between attempts.
    pub price_step: Decimal,
    /// Time-to-live of the order-status read-through cache.
    pub status_cache_ttl: Duration,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            cancel_poll_interval: Duration::from_millis(100),
            monitor_timeout: Duration::from_secs(60),
            late_day_monitor_timeout: Duration::from_secs(15),
            late_day_cutoff: LATE_DAY_CUTOFF,
            max_attempts: 75,
            price_step: dec!(0.05),
            status_cache_ttl: Duration::from_secs(1),
        }
    }
}
