//! Shared Data Model
//!
//! Plain data types exchanged between the stream client, the subscription
//! aggregator, the order lifecycle manager, and their collaborators.
//!
//! # Price sign convention
//!
//! A positive price means the trader pays net premium (debit); a negative
//! price means the trader receives net premium (credit). `OrderSpec` carries
//! the unsigned limit price plus an explicit [`OrderSign`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A symbol string (stock ticker or OCC option symbol).
pub type Symbol = String;

/// Identifier for an independent subscription consumer (a UI panel or
/// background job).
pub type ConsumerId = String;

/// Broker-assigned order identifier.
pub type OrderId = String;

// =============================================================================
// Market data
// =============================================================================

/// Which level-one feed a symbol belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Option contract quotes.
    Options,
    /// Equity (underlying) quotes.
    Equities,
}

impl FeedKind {
    /// Both feed kinds, in reconciliation order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Options, Self::Equities]
    }
}

/// One raw reading from the stream.
///
/// Fields are optional because the broker only sends fields that changed;
/// non-positive readings are treated as absent by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    /// Symbol the reading belongs to.
    pub symbol: Symbol,
    /// Bid price, if present in the message.
    pub bid: Option<Decimal>,
    /// Ask price, if present in the message.
    pub ask: Option<Decimal>,
    /// Last trade price, if present in the message.
    pub last: Option<Decimal>,
}

/// Cached per-symbol quote with last-good semantics: once a field holds a
/// valid value it is never cleared by a later message missing that field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    /// Last-good bid price.
    pub bid: Option<Decimal>,
    /// Last-good ask price.
    pub ask: Option<Decimal>,
    /// Last-good last-trade price.
    pub last: Option<Decimal>,
}

// =============================================================================
// Orders
// =============================================================================

/// Broker-side order status, normalized at the facade boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Submitted and live at the broker.
    Working,
    /// Completely executed.
    Filled,
    /// Rejected by the broker.
    Rejected,
    /// Canceled at the broker.
    Canceled,
    /// Status could not be determined.
    Unknown,
}

impl OrderStatus {
    /// Whether the order can no longer transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Canceled)
    }
}

/// Debit/credit classification of an order's net premium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSign {
    /// Trader pays net premium (positive price convention).
    Debit,
    /// Trader receives net premium (negative price convention).
    Credit,
}

impl OrderSign {
    /// Classify a signed price: strictly positive is a debit, everything
    /// else a credit.
    #[must_use]
    pub fn classify(price: Decimal) -> Self {
        if price > Decimal::ZERO {
            Self::Debit
        } else {
            Self::Credit
        }
    }
}

/// Direction of a single option leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegInstruction {
    /// Open a long position.
    BuyToOpen,
    /// Open a short position.
    SellToOpen,
    /// Close a short position.
    BuyToClose,
    /// Close a long position.
    SellToClose,
}

/// One option contract within a multi-leg order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLeg {
    /// OCC option symbol of the contract.
    pub symbol: Symbol,
    /// Leg direction.
    pub instruction: LegInstruction,
    /// Number of contracts.
    pub quantity: u32,
}

/// A broker-ready order: legs plus an unsigned limit price and its sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Option legs of the order.
    pub legs: Vec<OrderLeg>,
    /// Unsigned limit price.
    pub price: Decimal,
    /// Whether the price is paid or received.
    pub sign: OrderSign,
}

impl OrderSpec {
    /// Build a spec from a signed price (see the module-level sign
    /// convention) and a set of legs.
    #[must_use]
    pub fn from_signed_price(legs: Vec<OrderLeg>, signed_price: Decimal) -> Self {
        Self {
            legs,
            price: signed_price.abs(),
            sign: OrderSign::classify(signed_price),
        }
    }
}

/// Current state of an order as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    /// Broker-assigned order id.
    pub order_id: OrderId,
    /// Normalized status.
    pub status: OrderStatus,
    /// Unsigned limit price.
    pub limit_price: Decimal,
    /// Debit/credit classification.
    pub sign: OrderSign,
    /// Contracts filled so far.
    pub filled_quantity: Decimal,
    /// Broker-supplied rejection reason, when rejected.
    pub rejection_reason: Option<String>,
    /// Legs of the order, used to reconstruct it for a replace fallback.
    pub legs: Vec<OrderLeg>,
}

impl OrderState {
    /// Limit price adjusted for cash flow: negative when the trader pays
    /// (debit), positive when the trader receives (credit).
    #[must_use]
    pub fn cash_flow_price(&self) -> Decimal {
        match self.sign {
            OrderSign::Debit => -self.limit_price,
            OrderSign::Credit => self.limit_price,
        }
    }
}

// =============================================================================
// Terminal outcomes
// =============================================================================

/// Terminal outcome of a price-improvement retry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImprovementOutcome {
    /// An attempt filled.
    Filled,
    /// Cancelled, either cooperatively or broker-side.
    Cancelled,
    /// The broker rejected an attempt.
    Rejected,
    /// The attempt cap was reached without a fill.
    Exhausted,
    /// The order factory declined to submit (dry run); nothing was placed.
    NotSubmitted,
}

/// Outcome of a cancel request. Broker responses meaning "already in a
/// terminal state" are success-equivalent, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The cancel request was accepted.
    Canceled,
    /// The order had already filled.
    AlreadyFilled,
    /// The order was already canceled (or otherwise terminal).
    AlreadyCanceled,
}

/// Outcome of a price replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The order now works at the new price under the returned id.
    Replaced(OrderId),
    /// The order filled before it could be replaced; no resubmission
    /// happened.
    AlreadyFilled,
}
