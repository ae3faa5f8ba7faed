#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Assistant Core - Streaming & Order Lifecycle
//!
//! The concurrency and resilience core of a personal options trading
//! assistant. It keeps the single live market-data stream healthy across
//! network failures and drives submitted orders through price-improvement
//! retries to a terminal outcome.
//!
//! # Components
//!
//! - **`stream`**: the Quote Stream Client - owns the one streaming
//!   connection, feeds a sticky per-symbol quote cache, and self-heals via a
//!   receive loop, a stale watchdog, and a mutex-guarded rebuild path.
//! - **`subscription`**: the Subscription Aggregator - merges symbol demand
//!   from independent consumers into one desired set and pushes only the
//!   deltas to the stream client.
//! - **`orders`**: the Order Lifecycle Manager - submits through a
//!   caller-supplied factory, polls status through a short-TTL cache, and
//!   retries with incrementally improved price until fill, rejection,
//!   cancellation, or exhaustion.
//! - **`broker`**: port traits for the opaque broker facade, the alert
//!   sink, and the order factory, plus the normalized error taxonomy.
//!
//! # Data Flow
//!
//! ```text
//! consumers ──register──► Aggregator ──deltas──► Stream Client ──► Quote Cache
//!                                                     │                ▲
//!                                                 MarketStream     receive loop
//!
//! strategy ──factory+price──► Lifecycle Manager ──place/poll/cancel──► BrokerApi
//!                                     │
//!                                 Alert Sink
//! ```
//!
//! Everything is in-process and in-memory: a restart loses all quote-cache
//! and retry-session state and rebuilds from the broker.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Broker facade ports, error taxonomy, backoff policy, and scripted fakes.
pub mod broker;

/// Settings structs with production defaults.
pub mod config;

/// Shared data model.
pub mod models;

/// Order lifecycle manager, price ladder, and status cache.
pub mod orders;

/// Quote stream client, quote cache, connection health, and stale watchdog.
pub mod stream;

/// Demand registry and subscription aggregator.
pub mod subscription;

/// Tracing setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

// Data model
pub use models::{
    CancelOutcome, ConsumerId, FeedKind, ImprovementOutcome, LegInstruction, OrderId, OrderLeg,
    OrderSign, OrderSpec, OrderState, OrderStatus, QuoteSnapshot, QuoteUpdate, ReplaceOutcome,
    Symbol,
};

// Ports and errors
pub use broker::{
    AlertSink, BrokerApi, BrokerError, FnOrderFactory, LogAlertSink, MarketStream, OrderFactory,
};

// Settings
pub use config::{OrderSettings, StreamSettings};

// Components
pub use orders::ladder::PriceLadder;
pub use orders::{OrderFlowError, OrderLifecycleManager};
pub use stream::{QuoteStreamClient, StreamClientError, StreamState};
pub use subscription::{SubscriptionAggregator, SubscriptionChanges, SubscriptionSink};
