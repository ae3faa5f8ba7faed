//! Order Lifecycle Manager
//!
//! Drives one order from submission to a terminal outcome. An attempt places
//! the order through the caller-supplied factory, monitors it on a fixed
//! poll interval, and on timeout cancels best-effort and advances to the
//! next rung of the price ladder. Sessions always terminate: filled,
//! cancelled, rejected, not-submitted, or exhausted at the attempt cap.
//!
//! Monitoring loops run independently per order id and never block the
//! streaming path. Cancellation is cooperative: a per-call token checked
//! every tick, so cancellation latency is bounded by the tick interval.

pub mod ladder;
pub mod status_cache;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broker::{AlertSink, BrokerApi, BrokerError, OrderFactory};
use crate::config::OrderSettings;
use crate::models::{
    CancelOutcome, ImprovementOutcome, OrderSpec, OrderState, OrderStatus, ReplaceOutcome,
};

use ladder::PriceLadder;
use status_cache::StatusCache;

// =============================================================================
// Error Type
// =============================================================================

/// Errors surfaced by order lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum OrderFlowError {
    /// A broker call failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The order factory failed unexpectedly; the retry session aborts.
    #[error("order factory failed: {0}")]
    Factory(#[source] BrokerError),
}

/// How one monitoring window ended.
#[derive(Debug)]
enum MonitorVerdict {
    Filled,
    Rejected { reason: Option<String> },
    CanceledByBroker,
    CancelRequested,
    TimedOut,
}

// =============================================================================
// Manager
// =============================================================================

/// Submits orders, polls their status, and retries with incrementally
/// improved price until a terminal outcome.
pub struct OrderLifecycleManager<B: BrokerApi> {
    broker: Arc<B>,
    alerts: Arc<dyn AlertSink>,
    settings: OrderSettings,
    status_cache: StatusCache,
}

impl<B: BrokerApi> OrderLifecycleManager<B> {
    /// Create a manager over a broker facade.
    #[must_use]
    pub fn new(broker: Arc<B>, alerts: Arc<dyn AlertSink>, settings: OrderSettings) -> Self {
        let status_cache = StatusCache::new(settings.status_cache_ttl);
        Self {
            broker,
            alerts,
            settings,
            status_cache,
        }
    }

    /// Run a full price-improvement session from a signed initial price,
    /// stepping by the configured default.
    ///
    /// # Errors
    ///
    /// Returns [`OrderFlowError::Factory`] when the factory fails (the
    /// session aborts rather than monitor a questionable order), or
    /// [`OrderFlowError::Broker`] for unexpected broker failures outside the
    /// tolerated cancel paths.
    pub async fn submit_with_improvement(
        &self,
        factory: &dyn OrderFactory,
        initial_price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ImprovementOutcome, OrderFlowError> {
        let ladder = PriceLadder::new(initial_price, self.settings.price_step);
        self.submit_with_ladder(factory, &ladder, cancel).await
    }

    /// Run a full price-improvement session over an explicit ladder (for
    /// tick-aware callers).
    ///
    /// # Errors
    ///
    /// Same contract as [`submit_with_improvement`](Self::submit_with_improvement).
    pub async fn submit_with_ladder(
        &self,
        factory: &dyn OrderFactory,
        ladder: &PriceLadder,
        cancel: &CancellationToken,
    ) -> Result<ImprovementOutcome, OrderFlowError> {
        let monitor_timeout = self.monitor_timeout_now();

        for attempt in 0..self.settings.max_attempts {
            let price = ladder.price_for_attempt(attempt);

            if attempt > 0 {
                tracing::info!(
                    attempt = attempt + 1,
                    cap = self.settings.max_attempts,
                    %price,
                    improvement = %ladder.improvement_at(attempt),
                    "improving price"
                );
            }

            let order_id = match factory.submit_at(price).await {
                Ok(Some(order_id)) => order_id,
                Ok(None) => {
                    tracing::info!(%price, "factory declined to submit, ending session");
                    return Ok(ImprovementOutcome::NotSubmitted);
                }
                Err(error) => {
                    self.alerts
                        .notify(&format!("order submission failed at {price}: {error}"));
                    return Err(OrderFlowError::Factory(error));
                }
            };
            self.alerts
                .notify(&format!("order {order_id} placed at {price}"));

            match self.monitor(&order_id, monitor_timeout, cancel).await {
                MonitorVerdict::Filled => {
                    self.alerts.notify(&format!("order {order_id} filled"));
                    return Ok(ImprovementOutcome::Filled);
                }
                MonitorVerdict::Rejected { reason } => {
                    self.alerts.notify(&format!(
                        "order {order_id} rejected: {}",
                        reason.as_deref().unwrap_or("no reason provided")
                    ));
                    return Ok(ImprovementOutcome::Rejected);
                }
                MonitorVerdict::CanceledByBroker => {
                    tracing::info!(%order_id, "order canceled broker-side");
                    return Ok(ImprovementOutcome::Cancelled);
                }
                MonitorVerdict::CancelRequested => {
                    match self.cancel(&order_id).await {
                        Ok(outcome) => {
                            tracing::info!(%order_id, ?outcome, "order cancelled on request");
                        }
                        Err(error) => {
                            tracing::warn!(%order_id, error = %error, "cancel failed");
                        }
                    }
                    return Ok(ImprovementOutcome::Cancelled);
                }
                MonitorVerdict::TimedOut => {
                    tracing::info!(%order_id, "attempt timed out, canceling before next rung");
                    match self.cancel(&order_id).await {
                        Ok(CancelOutcome::AlreadyFilled) => {
                            self.alerts.notify(&format!("order {order_id} filled"));
                            return Ok(ImprovementOutcome::Filled);
                        }
                        Ok(_) => {}
                        Err(error) => {
                            // The order may have filled or been canceled
                            // concurrently by the broker; the next status
                            // poll or attempt settles it.
                            tracing::warn!(%order_id, error = %error, "timeout cancel failed");
                        }
                    }
                }
            }
        }

        self.alerts
            .notify("failed to fill order after all price improvement attempts");
        Ok(ImprovementOutcome::Exhausted)
    }

    /// Query an order's state through the short-TTL read-through cache.
    ///
    /// # Errors
    ///
    /// Propagates broker failures on cache misses.
    pub async fn check_status(&self, order_id: &str) -> Result<OrderState, BrokerError> {
        if let Some(state) = self.status_cache.get(order_id) {
            return Ok(state);
        }
        let state = self.broker.order(order_id).await?;
        self.status_cache.insert(state.clone());
        Ok(state)
    }

    /// Cancel an order. Broker responses meaning "already filled" or
    /// "already canceled" are success-equivalent outcomes, not errors.
    ///
    /// # Errors
    ///
    /// Propagates failures other than the terminal-state responses.
    pub async fn cancel(&self, order_id: &str) -> Result<CancelOutcome, BrokerError> {
        match self.broker.cancel_order(order_id).await {
            Ok(()) => Ok(CancelOutcome::Canceled),
            Err(BrokerError::OrderNotCancelable {
                status: OrderStatus::Filled,
            }) => Ok(CancelOutcome::AlreadyFilled),
            Err(BrokerError::OrderNotCancelable { .. }) => Ok(CancelOutcome::AlreadyCanceled),
            Err(error) => Err(error),
        }
    }

    /// Move a working order to a new signed price.
    ///
    /// Prefers the broker's native in-place replace; when unsupported, falls
    /// back to cancel-then-resubmit reconstructed from the order's current
    /// legs. A cancel that loses the race to a fill aborts the replace and
    /// surfaces the fill instead of resubmitting a duplicate.
    ///
    /// # Errors
    ///
    /// Propagates broker failures from either path.
    pub async fn replace(
        &self,
        order_id: &str,
        new_price: Decimal,
    ) -> Result<ReplaceOutcome, OrderFlowError> {
        let current = self.broker.order(order_id).await?;
        let spec = OrderSpec::from_signed_price(current.legs.clone(), new_price);

        match self.broker.replace_order(order_id, &spec).await {
            Ok(new_id) => Ok(ReplaceOutcome::Replaced(new_id)),
            Err(BrokerError::Unsupported(_)) => {
                self.alerts.notify(&format!(
                    "native replace unsupported, canceling and resubmitting order {order_id}"
                ));
                match self.cancel(order_id).await? {
                    CancelOutcome::AlreadyFilled => Ok(ReplaceOutcome::AlreadyFilled),
                    CancelOutcome::Canceled | CancelOutcome::AlreadyCanceled => {
                        let new_id = self.broker.place_order(&spec).await?;
                        Ok(ReplaceOutcome::Replaced(new_id))
                    }
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Monitoring timeout for an attempt starting now: shortened after the
    /// late-day cutoff to react faster near the close.
    #[must_use]
    pub fn monitor_timeout_now(&self) -> Duration {
        self.monitor_timeout_at(chrono::Local::now().time())
    }

    fn monitor_timeout_at(&self, now: NaiveTime) -> Duration {
        if now >= self.settings.late_day_cutoff {
            self.settings.late_day_monitor_timeout
        } else {
            self.settings.monitor_timeout
        }
    }

    /// Watch one working order until fill, rejection, broker-side cancel,
    /// cooperative cancellation, or the attempt deadline.
    async fn monitor(
        &self,
        order_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> MonitorVerdict {
        let deadline = Instant::now() + timeout;
        let mut last_check: Option<Instant> = None;
        let mut next_progress_log = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return MonitorVerdict::CancelRequested;
            }
            let now = Instant::now();
            if now >= deadline {
                return MonitorVerdict::TimedOut;
            }

            if last_check.is_none_or(|at| now.duration_since(at) >= self.settings.poll_interval) {
                last_check = Some(now);
                match self.check_status(order_id).await {
                    Ok(state) => {
                        if now >= next_progress_log {
                            tracing::debug!(
                                order_id,
                                status = ?state.status,
                                filled = %state.filled_quantity,
                                remaining_secs = deadline.duration_since(now).as_secs(),
                                "monitoring order"
                            );
                            next_progress_log = now + Duration::from_secs(5);
                        }
                        match state.status {
                            OrderStatus::Filled => return MonitorVerdict::Filled,
                            OrderStatus::Rejected => {
                                return MonitorVerdict::Rejected {
                                    reason: state.rejection_reason,
                                };
                            }
                            OrderStatus::Canceled => return MonitorVerdict::CanceledByBroker,
                            OrderStatus::Working | OrderStatus::Unknown => {}
                        }
                    }
                    Err(error) => {
                        // Recoverable within the attempt: the deadline bounds
                        // how long we keep retrying.
                        tracing::warn!(order_id, error = %error, "status check failed");
                    }
                }
            }

            let tick = self
                .settings
                .cancel_poll_interval
                .min(deadline.duration_since(Instant::now()));
            tokio::select! {
                () = cancel.cancelled() => return MonitorVerdict::CancelRequested,
                () = tokio::time::sleep(tick) => {}
            }
        }
    }
}
