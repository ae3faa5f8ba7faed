//! Order Status Cache
//!
//! Short-TTL read-through cache keyed by order id, so concurrent pollers
//! within the same tick do not multiply broker calls. Invalidation is purely
//! by age.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::models::{OrderId, OrderState};

/// Age-invalidated cache of order states.
#[derive(Debug)]
pub struct StatusCache {
    ttl: Duration,
    inner: RwLock<HashMap<OrderId, (Instant, OrderState)>>,
}

impl StatusCache {
    /// Create a cache with the given time-to-live.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Get a fresh entry, if one exists.
    #[must_use]
    pub fn get(&self, order_id: &str) -> Option<OrderState> {
        let inner = self.inner.read();
        let (cached_at, state) = inner.get(order_id)?;
        (cached_at.elapsed() < self.ttl).then(|| state.clone())
    }

    /// Store the latest state for an order.
    pub fn insert(&self, state: OrderState) {
        self.inner
            .write()
            .insert(state.order_id.clone(), (Instant::now(), state));
    }
}
