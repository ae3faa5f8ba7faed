//! Quote Cache
//!
//! Per-symbol cache fed by the receive loop and read non-blockingly by
//! consumers. Fields follow last-good semantics: once a field has held a
//! valid (> 0) reading, later messages missing that field never clear it,
//! preventing UI flicker. Entries are created on first message and never
//! destroyed; scale is small.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::models::{QuoteSnapshot, QuoteUpdate, Symbol};

/// Thread-safe quote cache with sticky fields.
#[derive(Debug, Default)]
pub struct QuoteCache {
    inner: RwLock<HashMap<Symbol, QuoteSnapshot>>,
}

impl QuoteCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one update into the cache. Only valid (> 0) readings overwrite.
    pub fn apply(&self, update: &QuoteUpdate) {
        let mut inner = self.inner.write();
        let snapshot = inner.entry(update.symbol.clone()).or_default();

        if let Some(bid) = valid(update.bid) {
            snapshot.bid = Some(bid);
        }
        if let Some(ask) = valid(update.ask) {
            snapshot.ask = Some(ask);
        }
        if let Some(last) = valid(update.last) {
            snapshot.last = Some(last);
        }
    }

    /// Last trade price for a symbol, if ever seen.
    #[must_use]
    pub fn last(&self, symbol: &str) -> Option<Decimal> {
        self.inner.read().get(symbol).and_then(|s| s.last)
    }

    /// Bid and ask for a symbol; either side may be absent.
    #[must_use]
    pub fn bid_ask(&self, symbol: &str) -> (Option<Decimal>, Option<Decimal>) {
        self.inner
            .read()
            .get(symbol)
            .map_or((None, None), |s| (s.bid, s.ask))
    }

    /// Full snapshot for a symbol, if ever seen.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<QuoteSnapshot> {
        self.inner.read().get(symbol).cloned()
    }

    /// Number of symbols seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no symbol has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

fn valid(reading: Option<Decimal>) -> Option<Decimal> {
    reading.filter(|value| *value > Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn update(symbol: &str, bid: Option<Decimal>, ask: Option<Decimal>, last: Option<Decimal>) -> QuoteUpdate {
        QuoteUpdate {
            symbol: symbol.to_string(),
            bid,
            ask,
            last,
        }
    }

    #[test]
    fn unseen_symbol_reads_absent() {
        let cache = QuoteCache::new();
        assert_eq!(cache.last("SPY"), None);
        assert_eq!(cache.bid_ask("SPY"), (None, None));
        assert!(cache.snapshot("SPY").is_none());
    }

    #[test]
    fn fields_populate_independently() {
        let cache = QuoteCache::new();
        cache.apply(&update("SPY", Some(dec!(500.00)), None, None));
        cache.apply(&update("SPY", None, Some(dec!(500.05)), None));

        assert_eq!(cache.bid_ask("SPY"), (Some(dec!(500.00)), Some(dec!(500.05))));
        assert_eq!(cache.last("SPY"), None);
    }

    #[test]
    fn populated_field_survives_missing_reading() {
        let cache = QuoteCache::new();
        cache.apply(&update("SPY", Some(dec!(500.00)), Some(dec!(500.05)), Some(dec!(500.02))));
        cache.apply(&update("SPY", None, None, None));

        let snap = cache.snapshot("SPY").unwrap();
        assert_eq!(snap.bid, Some(dec!(500.00)));
        assert_eq!(snap.ask, Some(dec!(500.05)));
        assert_eq!(snap.last, Some(dec!(500.02)));
    }

    #[test]
    fn non_positive_readings_are_ignored() {
        let cache = QuoteCache::new();
        cache.apply(&update("SPY", Some(dec!(500.00)), None, None));
        cache.apply(&update("SPY", Some(Decimal::ZERO), Some(dec!(-1)), None));

        assert_eq!(cache.bid_ask("SPY"), (Some(dec!(500.00)), None));
    }

    #[test]
    fn newer_valid_reading_overwrites() {
        let cache = QuoteCache::new();
        cache.apply(&update("SPY", Some(dec!(500.00)), None, None));
        cache.apply(&update("SPY", Some(dec!(501.00)), None, None));

        assert_eq!(cache.bid_ask("SPY").0, Some(dec!(501.00)));
    }

    #[test]
    fn symbols_are_independent() {
        let cache = QuoteCache::new();
        cache.apply(&update("SPY", Some(dec!(500.00)), None, None));
        cache.apply(&update("QQQ", Some(dec!(400.00)), None, None));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.bid_ask("SPY").0, Some(dec!(500.00)));
        assert_eq!(cache.bid_ask("QQQ").0, Some(dec!(400.00)));
    }
}
