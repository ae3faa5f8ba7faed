//! Broker Facade Ports
//!
//! Trait definitions for everything this core needs from the outside world:
//! the broker's REST surface ([`BrokerApi`]), its streaming surface
//! ([`MarketStream`]), the one-way alert channel ([`AlertSink`]), and the
//! caller-supplied order factory ([`OrderFactory`]).
//!
//! All provider-specific failures are normalized into [`BrokerError`] at this
//! boundary so concrete error types never leak into the stream client or the
//! order lifecycle manager.

pub mod mock;
pub mod retry;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rust_decimal::Decimal;

use crate::models::{FeedKind, OrderId, OrderSpec, OrderState, OrderStatus, QuoteUpdate, Symbol};

// =============================================================================
// Error Type
// =============================================================================

/// Normalized broker failure, classified into the retry taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Transport-level failure (reset-by-peer, DNS, OS socket errors).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The broker returned an application-level error.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code from the broker.
        code: String,
        /// Error message from the broker.
        message: String,
    },

    /// Authentication or login failure. Fatal: typically expired
    /// credentials requiring operator action.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The order was rejected by the broker.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// No order with the given id exists.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order is already in a terminal state and cannot be canceled.
    #[error("order not cancelable: already {status:?}")]
    OrderNotCancelable {
        /// Terminal status reported by the broker.
        status: OrderStatus,
    },

    /// The broker asked us to slow down.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The broker does not implement this operation.
    #[error("operation not supported by broker: {0}")]
    Unsupported(&'static str),
}

impl BrokerError {
    /// Whether this failure is expected to clear on its own and should be
    /// retried per policy.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::RateLimited { .. }
        )
    }

    /// Whether this is a fatal credentials problem: never retried
    /// automatically.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }
}

// =============================================================================
// REST surface
// =============================================================================

/// The broker's request/response surface.
///
/// Auth refresh and rate limiting are the implementation's responsibility;
/// this core treats the facade as opaque and only reacts to the normalized
/// [`BrokerError`] taxonomy.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Resolve the account hash used by order endpoints.
    async fn account_hash(&self) -> Result<String, BrokerError>;

    /// Fetch point-in-time quotes for a set of symbols.
    async fn quotes(&self, symbols: &[Symbol]) -> Result<Vec<QuoteUpdate>, BrokerError>;

    /// Query the current state of an order.
    async fn order(&self, order_id: &str) -> Result<OrderState, BrokerError>;

    /// Place an order, returning the broker-assigned id.
    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderId, BrokerError>;

    /// Replace a working order's price in place, returning the id the order
    /// works under afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unsupported`] when the broker has no native
    /// replace; callers fall back to cancel-then-resubmit.
    async fn replace_order(&self, order_id: &str, spec: &OrderSpec)
        -> Result<OrderId, BrokerError>;

    /// Cancel a working order.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::OrderNotCancelable`] when the order is already
    /// terminal; callers treat that as success-equivalent.
    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;
}

// =============================================================================
// Streaming surface
// =============================================================================

/// The broker's streaming surface: a session-capable handle for the single
/// live market-data connection.
///
/// `login` (re)establishes the session; the server forgets subscriptions
/// across logins, so the stream client re-issues them after every reconnect.
#[async_trait]
pub trait MarketStream: Send + Sync {
    /// Establish (or re-establish) the streaming session.
    async fn login(&self) -> Result<(), BrokerError>;

    /// Gracefully end the streaming session.
    async fn logout(&self) -> Result<(), BrokerError>;

    /// Subscribe symbols on a feed.
    async fn subscribe(&self, kind: FeedKind, symbols: &[Symbol]) -> Result<(), BrokerError>;

    /// Unsubscribe symbols from a feed.
    async fn unsubscribe(&self, kind: FeedKind, symbols: &[Symbol]) -> Result<(), BrokerError>;

    /// Receive the next quote update. Resolves only when a message arrives
    /// or the session fails; callers bound it with a timeout.
    async fn receive(&self) -> Result<QuoteUpdate, BrokerError>;
}

// =============================================================================
// Alert sink
// =============================================================================

/// One-way operator notification channel.
///
/// Fire-and-forget: implementations must never block and must swallow their
/// own delivery failures.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    /// Deliver a human-readable message.
    fn notify(&self, message: &str);
}

/// Default sink that routes alerts to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, message: &str) {
        tracing::warn!(alert = %message, "operator alert");
    }
}

// =============================================================================
// Order factory
// =============================================================================

/// Caller-supplied order constructor.
///
/// Strategy-specific parameters are captured by the implementation; the
/// lifecycle manager only varies the price. `Ok(None)` means the factory
/// declined to submit (dry run) and the retry session ends with
/// [`crate::models::ImprovementOutcome::NotSubmitted`].
#[async_trait]
pub trait OrderFactory: Send + Sync {
    /// Build and submit the order at the given signed price.
    async fn submit_at(&self, price: Decimal) -> Result<Option<OrderId>, BrokerError>;
}

/// Adapter turning a closure into an [`OrderFactory`].
pub struct FnOrderFactory<F> {
    submit: F,
}

impl<F> FnOrderFactory<F>
where
    F: Fn(Decimal) -> BoxFuture<'static, Result<Option<OrderId>, BrokerError>> + Send + Sync,
{
    /// Wrap a closure producing a boxed submission future.
    pub const fn new(submit: F) -> Self {
        Self { submit }
    }
}

#[async_trait]
impl<F> OrderFactory for FnOrderFactory<F>
where
    F: Fn(Decimal) -> BoxFuture<'static, Result<Option<OrderId>, BrokerError>> + Send + Sync,
{
    async fn submit_at(&self, price: Decimal) -> Result<Option<OrderId>, BrokerError> {
        (self.submit)(price).await
    }
}
