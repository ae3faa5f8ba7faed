//! Subscription Aggregation
//!
//! Lets N independent consumers (UI panels, background jobs) express symbol
//! demand without each managing the shared connection. Demand is tracked per
//! consumer; reconciliation computes the union of all registered demand,
//! diffs it against the last-applied state, and pushes only the deltas to
//! the stream client.
//!
//! A symbol stays subscribed as long as *any* consumer wants it: removal is
//! gated on zero remaining demand. Re-registering a consumer id replaces its
//! prior demand rather than merging.
//!
//! Reconciliation runs are serialized through one async apply guard so
//! partial diffs from concurrent calls can never interleave.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::broker::BrokerError;
use crate::models::{ConsumerId, FeedKind, Symbol};

// =============================================================================
// Sink port
// =============================================================================

/// Where reconciliation deltas land (the stream client in production).
#[async_trait]
pub trait SubscriptionSink: Send + Sync {
    /// Subscribe symbols on a feed.
    async fn sink_subscribe(&self, kind: FeedKind, symbols: &[Symbol]) -> Result<(), BrokerError>;

    /// Unsubscribe symbols from a feed.
    async fn sink_unsubscribe(
        &self,
        kind: FeedKind,
        symbols: &[Symbol],
    ) -> Result<(), BrokerError>;
}

// =============================================================================
// Demand registry
// =============================================================================

/// One consumer's demand.
#[derive(Debug, Default, Clone)]
struct Demand {
    options: HashSet<Symbol>,
    equities: HashSet<Symbol>,
}

impl Demand {
    fn set(&self, kind: FeedKind) -> &HashSet<Symbol> {
        match kind {
            FeedKind::Options => &self.options,
            FeedKind::Equities => &self.equities,
        }
    }
}

/// Pure per-consumer demand bookkeeping. Registering a consumer id replaces
/// its prior demand.
#[derive(Debug, Default)]
pub struct DemandRegistry {
    consumers: HashMap<ConsumerId, Demand>,
}

impl DemandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the demand for a consumer. Empty symbols are dropped and
    /// equities normalized to uppercase.
    pub fn register<I, J>(&mut self, consumer: &str, options: I, equities: J)
    where
        I: IntoIterator<Item = Symbol>,
        J: IntoIterator<Item = Symbol>,
    {
        let demand = Demand {
            options: options.into_iter().filter(|s| !s.is_empty()).collect(),
            equities: equities
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_uppercase())
                .collect(),
        };
        self.consumers.insert(consumer.to_string(), demand);
    }

    /// Clear the demand for a consumer. Returns whether it was registered.
    pub fn unregister(&mut self, consumer: &str) -> bool {
        self.consumers.remove(consumer).is_some()
    }

    /// Union of all registered demand for a feed.
    #[must_use]
    pub fn desired(&self, kind: FeedKind) -> HashSet<Symbol> {
        let mut union = HashSet::new();
        for demand in self.consumers.values() {
            union.extend(demand.set(kind).iter().cloned());
        }
        union
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

// =============================================================================
// Deltas
// =============================================================================

/// Changes a reconciliation run must apply upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols to subscribe, sorted.
    pub subscribe: Vec<Symbol>,
    /// Symbols to unsubscribe, sorted.
    pub unsubscribe: Vec<Symbol>,
}

impl SubscriptionChanges {
    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Diff a desired set against the last-applied set.
#[must_use]
pub fn diff(desired: &HashSet<Symbol>, applied: &HashSet<Symbol>) -> SubscriptionChanges {
    let mut subscribe: Vec<Symbol> = desired.difference(applied).cloned().collect();
    let mut unsubscribe: Vec<Symbol> = applied.difference(desired).cloned().collect();
    subscribe.sort();
    unsubscribe.sort();
    SubscriptionChanges {
        subscribe,
        unsubscribe,
    }
}

// =============================================================================
// Aggregator
// =============================================================================

#[derive(Debug, Default)]
struct AppliedState {
    options: HashSet<Symbol>,
    equities: HashSet<Symbol>,
}

impl AppliedState {
    fn set_mut(&mut self, kind: FeedKind) -> &mut HashSet<Symbol> {
        match kind {
            FeedKind::Options => &mut self.options,
            FeedKind::Equities => &mut self.equities,
        }
    }
}

/// Merges subscription demand from many consumers into one desired set and
/// pushes only the deltas to the sink.
pub struct SubscriptionAggregator<C: SubscriptionSink> {
    sink: std::sync::Arc<C>,
    registry: RwLock<DemandRegistry>,
    /// Last-applied state; doubles as the serialization guard for
    /// reconciliation runs.
    applied: tokio::sync::Mutex<AppliedState>,
}

impl<C: SubscriptionSink> SubscriptionAggregator<C> {
    /// Create an aggregator over a sink.
    #[must_use]
    pub fn new(sink: std::sync::Arc<C>) -> Self {
        Self {
            sink,
            registry: RwLock::new(DemandRegistry::new()),
            applied: tokio::sync::Mutex::new(AppliedState::default()),
        }
    }

    /// Replace a consumer's demand and reconcile.
    ///
    /// # Errors
    ///
    /// Returns the first sink error; deltas already applied are committed,
    /// the rest retried by the next reconciliation.
    pub async fn register(
        &self,
        consumer: &str,
        options: Vec<Symbol>,
        equities: Vec<Symbol>,
    ) -> Result<(), BrokerError> {
        self.registry.write().register(consumer, options, equities);
        self.reconcile().await
    }

    /// Clear a consumer's demand and reconcile.
    ///
    /// # Errors
    ///
    /// Same contract as [`register`](Self::register).
    pub async fn unregister(&self, consumer: &str) -> Result<(), BrokerError> {
        self.registry.write().unregister(consumer);
        self.reconcile().await
    }

    /// Symbols currently applied upstream for a feed, sorted.
    pub async fn applied(&self, kind: FeedKind) -> Vec<Symbol> {
        let applied = self.applied.lock().await;
        let set = match kind {
            FeedKind::Options => &applied.options,
            FeedKind::Equities => &applied.equities,
        };
        let mut symbols: Vec<Symbol> = set.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.registry.read().consumer_count()
    }

    async fn reconcile(&self) -> Result<(), BrokerError> {
        let mut applied = self.applied.lock().await;

        for kind in FeedKind::all().iter().copied() {
            // Read the latest demand inside the guard so the newest
            // registration wins even under concurrent calls.
            let desired = self.registry.read().desired(kind);
            let changes = diff(&desired, applied.set_mut(kind));
            if changes.is_empty() {
                continue;
            }

            tracing::debug!(
                ?kind,
                subscribe = changes.subscribe.len(),
                unsubscribe = changes.unsubscribe.len(),
                "reconciling subscriptions"
            );

            if !changes.unsubscribe.is_empty() {
                self.sink
                    .sink_unsubscribe(kind, &changes.unsubscribe)
                    .await?;
                let set = applied.set_mut(kind);
                for symbol in &changes.unsubscribe {
                    set.remove(symbol);
                }
            }
            if !changes.subscribe.is_empty() {
                self.sink.sink_subscribe(kind, &changes.subscribe).await?;
                applied
                    .set_mut(kind)
                    .extend(changes.subscribe.iter().cloned());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn set(names: &[&str]) -> HashSet<Symbol> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    // -------------------------------------------------------------------------
    // DemandRegistry
    // -------------------------------------------------------------------------

    #[test]
    fn register_unions_across_consumers() {
        let mut registry = DemandRegistry::new();
        registry.register("A", symbols(&["X", "Y"]), vec![]);
        registry.register("B", symbols(&["Y", "Z"]), vec![]);

        assert_eq!(registry.desired(FeedKind::Options), set(&["X", "Y", "Z"]));
    }

    #[test]
    fn reregister_replaces_not_merges() {
        let mut registry = DemandRegistry::new();
        registry.register("A", symbols(&["X", "Y", "Z"]), vec![]);
        registry.register("A", symbols(&["X"]), vec![]);

        assert_eq!(registry.desired(FeedKind::Options), set(&["X"]));
    }

    #[test]
    fn unregister_drops_only_that_consumer() {
        let mut registry = DemandRegistry::new();
        registry.register("A", symbols(&["X", "Y"]), vec![]);
        registry.register("B", symbols(&["Y", "Z"]), vec![]);

        assert!(registry.unregister("A"));
        assert_eq!(registry.desired(FeedKind::Options), set(&["Y", "Z"]));
        assert!(!registry.unregister("A"));
    }

    #[test]
    fn equities_normalized_and_empties_dropped() {
        let mut registry = DemandRegistry::new();
        registry.register("A", symbols(&["", "X"]), symbols(&["spy", ""]));

        assert_eq!(registry.desired(FeedKind::Options), set(&["X"]));
        assert_eq!(registry.desired(FeedKind::Equities), set(&["SPY"]));
    }

    // -------------------------------------------------------------------------
    // diff
    // -------------------------------------------------------------------------

    #[test]
    fn diff_computes_additions_and_removals() {
        let changes = diff(&set(&["A", "B", "C"]), &set(&["B", "C", "D"]));
        assert_eq!(changes.subscribe, symbols(&["A"]));
        assert_eq!(changes.unsubscribe, symbols(&["D"]));
    }

    #[test]
    fn diff_of_equal_sets_is_empty() {
        let changes = diff(&set(&["A"]), &set(&["A"]));
        assert!(changes.is_empty());
    }

    // -------------------------------------------------------------------------
    // Aggregator
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingSink {
        subscribed: Mutex<HashSet<Symbol>>,
        calls: Mutex<Vec<(FeedKind, &'static str, Vec<Symbol>)>>,
    }

    #[async_trait]
    impl SubscriptionSink for RecordingSink {
        async fn sink_subscribe(
            &self,
            kind: FeedKind,
            symbols: &[Symbol],
        ) -> Result<(), BrokerError> {
            self.subscribed.lock().extend(symbols.iter().cloned());
            self.calls.lock().push((kind, "sub", symbols.to_vec()));
            Ok(())
        }

        async fn sink_unsubscribe(
            &self,
            kind: FeedKind,
            symbols: &[Symbol],
        ) -> Result<(), BrokerError> {
            let mut subscribed = self.subscribed.lock();
            for symbol in symbols {
                subscribed.remove(symbol);
            }
            self.calls.lock().push((kind, "unsub", symbols.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn union_is_applied_and_shared_symbols_retained() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = SubscriptionAggregator::new(Arc::clone(&sink));

        aggregator
            .register("A", symbols(&["X", "Y"]), vec![])
            .await
            .unwrap();
        aggregator
            .register("B", symbols(&["Y", "Z"]), vec![])
            .await
            .unwrap();

        assert_eq!(*sink.subscribed.lock(), set(&["X", "Y", "Z"]));

        aggregator.unregister("A").await.unwrap();

        // Y retained: still demanded by B.
        assert_eq!(*sink.subscribed.lock(), set(&["Y", "Z"]));
        assert_eq!(
            aggregator.applied(FeedKind::Options).await,
            symbols(&["Y", "Z"])
        );
    }

    #[tokio::test]
    async fn shrinking_a_consumer_unsubscribes_the_difference() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = SubscriptionAggregator::new(Arc::clone(&sink));

        aggregator
            .register("A", symbols(&["X", "Y", "Z"]), vec![])
            .await
            .unwrap();
        aggregator
            .register("B", symbols(&["Z"]), vec![])
            .await
            .unwrap();
        aggregator
            .register("A", symbols(&["X"]), vec![])
            .await
            .unwrap();

        // Y dropped (no one wants it), Z retained (B wants it).
        assert_eq!(*sink.subscribed.lock(), set(&["X", "Z"]));
    }

    #[tokio::test]
    async fn reregistering_same_demand_is_a_no_op_upstream() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = SubscriptionAggregator::new(Arc::clone(&sink));

        aggregator
            .register("A", symbols(&["X"]), vec![])
            .await
            .unwrap();
        let calls_before = sink.calls.lock().len();
        aggregator
            .register("A", symbols(&["X"]), vec![])
            .await
            .unwrap();

        assert_eq!(sink.calls.lock().len(), calls_before);
    }

    #[tokio::test]
    async fn option_and_equity_demand_reconcile_independently() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = SubscriptionAggregator::new(Arc::clone(&sink));

        aggregator
            .register("A", symbols(&["OPT1"]), symbols(&["spy"]))
            .await
            .unwrap();

        assert_eq!(
            aggregator.applied(FeedKind::Options).await,
            symbols(&["OPT1"])
        );
        assert_eq!(
            aggregator.applied(FeedKind::Equities).await,
            symbols(&["SPY"])
        );
    }

    #[tokio::test]
    async fn concurrent_registers_converge_to_the_union() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = Arc::new(SubscriptionAggregator::new(Arc::clone(&sink)));

        let mut handles = Vec::new();
        for i in 0..10u32 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(tokio::spawn(async move {
                aggregator
                    .register(
                        &format!("consumer-{i}"),
                        vec![format!("SYM{i}"), "SHARED".to_string()],
                        vec![],
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let applied = aggregator.applied(FeedKind::Options).await;
        assert_eq!(applied.len(), 11);
        assert!(applied.contains(&"SHARED".to_string()));
    }

    #[tokio::test]
    async fn failed_sink_call_is_retried_on_next_reconcile() {
        #[derive(Default)]
        struct FlakySink {
            inner: RecordingSink,
            fail_next: Mutex<bool>,
        }

        #[async_trait]
        impl SubscriptionSink for FlakySink {
            async fn sink_subscribe(
                &self,
                kind: FeedKind,
                symbols: &[Symbol],
            ) -> Result<(), BrokerError> {
                if std::mem::take(&mut *self.fail_next.lock()) {
                    return Err(BrokerError::Transport("flaky".to_string()));
                }
                self.inner.sink_subscribe(kind, symbols).await
            }

            async fn sink_unsubscribe(
                &self,
                kind: FeedKind,
                symbols: &[Symbol],
            ) -> Result<(), BrokerError> {
                self.inner.sink_unsubscribe(kind, symbols).await
            }
        }

        let sink = Arc::new(FlakySink::default());
        *sink.fail_next.lock() = true;
        let aggregator = SubscriptionAggregator::new(Arc::clone(&sink));

        assert!(
            aggregator
                .register("A", symbols(&["X"]), vec![])
                .await
                .is_err()
        );
        // The delta was not committed, so the next call retries it.
        aggregator
            .register("B", symbols(&["Y"]), vec![])
            .await
            .unwrap();

        assert_eq!(*sink.inner.subscribed.lock(), set(&["X", "Y"]));
    }
}
