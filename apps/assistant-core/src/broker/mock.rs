//! Scripted Broker Fakes
//!
//! In-memory implementations of the facade ports that return scripted
//! responses without touching a network. Used by unit tests, integration
//! tests, and dry runs. Order ids are generated sequentially starting
//! from 1.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::models::{
    FeedKind, OrderId, OrderSpec, OrderState, OrderStatus, QuoteUpdate, Symbol,
};

use super::{AlertSink, BrokerApi, BrokerError, MarketStream};

// =============================================================================
// Scripted broker
// =============================================================================

/// Scripted behavior assigned to each successively placed order.
#[derive(Debug, Clone, Copy)]
pub enum OrderScript {
    /// Working until the given (tokio) time has elapsed, then filled.
    FillAfter(Duration),
    /// Working until the given time has elapsed, then rejected.
    RejectAfter(Duration),
    /// Working until canceled or the monitor gives up.
    StayWorking,
}

struct ScriptedOrder {
    spec: OrderSpec,
    script: OrderScript,
    placed_at: Instant,
    canceled: bool,
}

impl ScriptedOrder {
    fn status(&self) -> OrderStatus {
        if self.canceled {
            return OrderStatus::Canceled;
        }
        match self.script {
            OrderScript::FillAfter(after) if self.placed_at.elapsed() >= after => {
                OrderStatus::Filled
            }
            OrderScript::RejectAfter(after) if self.placed_at.elapsed() >= after => {
                OrderStatus::Rejected
            }
            _ => OrderStatus::Working,
        }
    }
}

/// Scripted [`BrokerApi`] fake.
#[derive(Default)]
pub struct MockBroker {
    next_id: AtomicU64,
    scripts: Mutex<VecDeque<OrderScript>>,
    orders: Mutex<HashMap<OrderId, ScriptedOrder>>,
    placed_prices: Mutex<Vec<Decimal>>,
    quotes: Mutex<Vec<QuoteUpdate>>,
    replace_supported: AtomicBool,
}

impl MockBroker {
    /// Create a fake with no scripted orders; unscripted orders stay
    /// working forever.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// Append the behavior for the next placed order.
    pub fn script_order(&self, script: OrderScript) {
        self.scripts.lock().push_back(script);
    }

    /// Enable or disable the native replace endpoint.
    pub fn set_replace_supported(&self, supported: bool) {
        self.replace_supported.store(supported, Ordering::SeqCst);
    }

    /// Preload the point-in-time quote response.
    pub fn set_quotes(&self, quotes: Vec<QuoteUpdate>) {
        *self.quotes.lock() = quotes;
    }

    /// Unsigned limit prices of every placed order, in placement order.
    #[must_use]
    pub fn placed_prices(&self) -> Vec<Decimal> {
        self.placed_prices.lock().clone()
    }

    /// Signed prices (negative for credits) of every placed order.
    #[must_use]
    pub fn placed_signed_prices(&self) -> Vec<Decimal> {
        self.orders_in_placement_order()
            .iter()
            .map(|spec| match spec.sign {
                crate::models::OrderSign::Debit => spec.price,
                crate::models::OrderSign::Credit => -spec.price,
            })
            .collect()
    }

    /// Mark a working order as filled, as if the broker executed it.
    pub fn fill_now(&self, order_id: &str) {
        if let Some(order) = self.orders.lock().get_mut(order_id) {
            order.script = OrderScript::FillAfter(Duration::ZERO);
            order.placed_at = Instant::now();
        }
    }

    fn orders_in_placement_order(&self) -> Vec<OrderSpec> {
        let orders = self.orders.lock();
        let mut ids: Vec<&OrderId> = orders.keys().collect();
        ids.sort_by_key(|id| {
            id.trim_start_matches("order-")
                .parse::<u64>()
                .unwrap_or(u64::MAX)
        });
        ids.iter().map(|id| orders[*id].spec.clone()).collect()
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn account_hash(&self) -> Result<String, BrokerError> {
        Ok("mock-account-hash".to_string())
    }

    async fn quotes(&self, symbols: &[Symbol]) -> Result<Vec<QuoteUpdate>, BrokerError> {
        let quotes = self.quotes.lock();
        Ok(quotes
            .iter()
            .filter(|q| symbols.contains(&q.symbol))
            .cloned()
            .collect())
    }

    async fn order(&self, order_id: &str) -> Result<OrderState, BrokerError> {
        let orders = self.orders.lock();
        let order = orders
            .get(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.to_string()))?;
        let status = order.status();
        Ok(OrderState {
            order_id: order_id.to_string(),
            status,
            limit_price: order.spec.price,
            sign: order.spec.sign,
            filled_quantity: if status == OrderStatus::Filled {
                order
                    .spec
                    .legs
                    .first()
                    .map_or(Decimal::ONE, |leg| Decimal::from(leg.quantity))
            } else {
                Decimal::ZERO
            },
            rejection_reason: (status == OrderStatus::Rejected)
                .then(|| "scripted rejection".to_string()),
            legs: order.spec.legs.clone(),
        })
    }

    async fn place_order(&self, spec: &OrderSpec) -> Result<OrderId, BrokerError> {
        let id = format!("order-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(OrderScript::StayWorking);
        self.placed_prices.lock().push(spec.price);
        self.orders.lock().insert(
            id.clone(),
            ScriptedOrder {
                spec: spec.clone(),
                script,
                placed_at: Instant::now(),
                canceled: false,
            },
        );
        Ok(id)
    }

    async fn replace_order(
        &self,
        order_id: &str,
        spec: &OrderSpec,
    ) -> Result<OrderId, BrokerError> {
        if !self.replace_supported.load(Ordering::SeqCst) {
            return Err(BrokerError::Unsupported("replace_order"));
        }
        self.cancel_order(order_id).await?;
        self.place_order(spec).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(order_id.to_string()))?;
        let status = order.status();
        if status.is_terminal() {
            return Err(BrokerError::OrderNotCancelable { status });
        }
        order.canceled = true;
        Ok(())
    }
}

// =============================================================================
// Scripted market stream
// =============================================================================

/// One step of a scripted receive sequence.
#[derive(Debug)]
pub enum StreamStep {
    /// Deliver a quote update.
    Update(QuoteUpdate),
    /// Fail the receive call.
    Error(BrokerError),
}

/// Scripted [`MarketStream`] fake.
///
/// `receive` pops scripted steps; once the script is exhausted it stays
/// pending forever, exercising the receive-timeout (idle) path.
#[derive(Default)]
pub struct MockMarketStream {
    login_calls: AtomicU32,
    login_failures: Mutex<VecDeque<BrokerError>>,
    steps: Mutex<VecDeque<StreamStep>>,
    subscribes: Mutex<Vec<(FeedKind, Vec<Symbol>)>>,
    unsubscribes: Mutex<Vec<(FeedKind, Vec<Symbol>)>>,
}

impl MockMarketStream {
    /// Create a stream with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to the receive script.
    pub fn push_step(&self, step: StreamStep) {
        self.steps.lock().push_back(step);
    }

    /// Queue a failure for the next login call.
    pub fn fail_next_login(&self, error: BrokerError) {
        self.login_failures.lock().push_back(error);
    }

    /// Number of login calls so far.
    #[must_use]
    pub fn login_count(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }

    /// Every protocol-level subscribe call, in order.
    #[must_use]
    pub fn subscribe_calls(&self) -> Vec<(FeedKind, Vec<Symbol>)> {
        self.subscribes.lock().clone()
    }

    /// Every protocol-level unsubscribe call, in order.
    #[must_use]
    pub fn unsubscribe_calls(&self) -> Vec<(FeedKind, Vec<Symbol>)> {
        self.unsubscribes.lock().clone()
    }
}

#[async_trait]
impl MarketStream for MockMarketStream {
    async fn login(&self) -> Result<(), BrokerError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.login_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn subscribe(&self, kind: FeedKind, symbols: &[Symbol]) -> Result<(), BrokerError> {
        self.subscribes.lock().push((kind, symbols.to_vec()));
        Ok(())
    }

    async fn unsubscribe(&self, kind: FeedKind, symbols: &[Symbol]) -> Result<(), BrokerError> {
        self.unsubscribes.lock().push((kind, symbols.to_vec()));
        Ok(())
    }

    async fn receive(&self) -> Result<QuoteUpdate, BrokerError> {
        let step = self.steps.lock().pop_front();
        match step {
            Some(StreamStep::Update(update)) => Ok(update),
            Some(StreamStep::Error(error)) => Err(error),
            None => futures::future::pending().await,
        }
    }
}

// =============================================================================
// Recording alert sink
// =============================================================================

/// Alert sink that records every message for assertions.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingAlertSink {
    /// Create an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn notify(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn spec(price: Decimal) -> OrderSpec {
        OrderSpec::from_signed_price(vec![], price)
    }

    #[tokio::test]
    async fn sequential_order_ids() {
        let broker = MockBroker::new();
        let a = broker.place_order(&spec(dec!(1.00))).await.unwrap();
        let b = broker.place_order(&spec(dec!(1.05))).await.unwrap();
        assert_eq!(a, "order-1");
        assert_eq!(b, "order-2");
        assert_eq!(broker.placed_prices(), vec![dec!(1.00), dec!(1.05)]);
    }

    #[tokio::test]
    async fn scripted_fill_is_visible_after_delay() {
        tokio::time::pause();

        let broker = MockBroker::new();
        broker.script_order(OrderScript::FillAfter(Duration::from_secs(5)));
        let id = broker.place_order(&spec(dec!(2.50))).await.unwrap();

        let state = broker.order(&id).await.unwrap();
        assert_eq!(state.status, OrderStatus::Working);

        tokio::time::advance(Duration::from_secs(5)).await;
        let state = broker.order(&id).await.unwrap();
        assert_eq!(state.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn cancel_of_filled_order_reports_terminal_status() {
        let broker = MockBroker::new();
        broker.script_order(OrderScript::FillAfter(Duration::ZERO));
        let id = broker.place_order(&spec(dec!(2.50))).await.unwrap();

        let err = broker.cancel_order(&id).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::OrderNotCancelable {
                status: OrderStatus::Filled
            }
        ));
    }

    #[tokio::test]
    async fn replace_unsupported_by_default() {
        let broker = MockBroker::new();
        let id = broker.place_order(&spec(dec!(2.50))).await.unwrap();
        let err = broker.replace_order(&id, &spec(dec!(2.55))).await.unwrap_err();
        assert!(matches!(err, BrokerError::Unsupported(_)));
    }

    #[tokio::test]
    async fn stream_script_plays_in_order() {
        let stream = MockMarketStream::new();
        stream.push_step(StreamStep::Update(QuoteUpdate {
            symbol: "SPY".to_string(),
            bid: Some(dec!(500.00)),
            ask: Some(dec!(500.05)),
            last: None,
        }));
        stream.push_step(StreamStep::Error(BrokerError::Transport(
            "reset".to_string(),
        )));

        assert_eq!(stream.receive().await.unwrap().symbol, "SPY");
        assert!(stream.receive().await.is_err());
    }
}
