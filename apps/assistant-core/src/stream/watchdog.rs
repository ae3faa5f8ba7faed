//! Stale-Stream Watchdog
//!
//! Independent timer that detects silent connection stalls the receive loop
//! cannot see: a half-open socket accepts reads but never delivers data, so
//! the receive loop keeps timing out "normally" while the quote cache goes
//! stale. The watchdog ticks on its own cadence and forces a reconnect when
//! the gap since the last message exceeds the stale threshold.
//!
//! Forced restarts are rate-limited by a cooldown so a dead upstream cannot
//! cause a restart storm.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::health::ConnectionHealth;

/// Configuration for the watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Interval between staleness checks.
    pub interval: Duration,
    /// Gap since the last message after which the stream counts as stalled.
    pub stale_after: Duration,
    /// Minimum time between forced restarts.
    pub restart_cooldown: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
            restart_cooldown: Duration::from_secs(60),
        }
    }
}

/// Events emitted by the watchdog.
#[derive(Debug, Clone)]
pub enum WatchdogEvent {
    /// The stream stalled; the connection should be rebuilt.
    ForceRestart {
        /// Observed gap since the last message.
        gap: Duration,
    },
}

/// Watchdog task detecting silent stalls.
pub struct StaleWatchdog {
    config: WatchdogConfig,
    health: Arc<ConnectionHealth>,
    event_tx: mpsc::Sender<WatchdogEvent>,
    cancel: CancellationToken,
}

impl StaleWatchdog {
    /// Create a new watchdog.
    #[must_use]
    pub const fn new(
        config: WatchdogConfig,
        health: Arc<ConnectionHealth>,
        event_tx: mpsc::Sender<WatchdogEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            health,
            event_tx,
            cancel,
        }
    }

    /// Run the staleness check loop until cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("watchdog cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Check staleness; `Err(())` means the event channel closed and the
    /// loop should exit.
    async fn check(&self) -> Result<(), ()> {
        let gap = self.health.message_gap();
        if gap <= self.config.stale_after {
            return Ok(());
        }
        if !self.health.restart_allowed(self.config.restart_cooldown) {
            tracing::debug!(
                gap_secs = gap.as_secs(),
                "stream stale but restart cooldown active"
            );
            return Ok(());
        }

        tracing::warn!(
            gap_secs = gap.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "stream stalled, forcing restart"
        );
        if self
            .event_tx
            .send(WatchdogEvent::ForceRestart { gap })
            .await
            .is_err()
        {
            tracing::debug!("watchdog event channel closed");
            return Err(());
        }
        Ok(())
    }
}
