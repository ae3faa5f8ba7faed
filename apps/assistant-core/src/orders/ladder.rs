//! Price Improvement Ladder
//!
//! Computes the limit price for each retry attempt. The sign of the initial
//! price classifies the order: a positive price is a debit (we pay, so
//! improving means offering more), a negative price is a credit (we receive,
//! so improving means accepting less). Every rung is rounded to the nearest
//! step, and the step defaults to the underlying's tick size.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::OrderSign;

/// Tick size for an underlying: index options on SPX/SPXW trade in $0.05
/// increments, everything else in $0.01.
#[must_use]
pub fn tick_for(underlying: &str) -> Decimal {
    let sym = underlying.trim_start_matches('$').to_uppercase();
    if sym == "SPX" || sym == "SPXW" {
        dec!(0.05)
    } else {
        dec!(0.01)
    }
}

/// Round a price to the nearest multiple of `step`, normalized to cents.
#[must_use]
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value.round_dp(2);
    }
    ((value / step).round() * step).round_dp(2)
}

/// The sequence of limit prices for one retry session.
#[derive(Debug, Clone)]
pub struct PriceLadder {
    initial: Decimal,
    step: Decimal,
    sign: OrderSign,
}

impl PriceLadder {
    /// Build a ladder from a signed initial price and a positive step.
    #[must_use]
    pub fn new(initial: Decimal, step: Decimal) -> Self {
        Self {
            initial,
            step: step.abs(),
            sign: OrderSign::classify(initial),
        }
    }

    /// Build a ladder stepping by the underlying's tick size.
    #[must_use]
    pub fn for_underlying(initial: Decimal, underlying: &str) -> Self {
        Self::new(initial, tick_for(underlying))
    }

    /// Debit/credit classification of this ladder.
    #[must_use]
    pub const fn sign(&self) -> OrderSign {
        self.sign
    }

    /// Step between rungs.
    #[must_use]
    pub const fn step(&self) -> Decimal {
        self.step
    }

    /// Limit price for a zero-based attempt: debit ladders climb, credit
    /// ladders descend, every rung rounded to the nearest step.
    #[must_use]
    pub fn price_for_attempt(&self, attempt: u32) -> Decimal {
        let delta = self.step * Decimal::from(attempt);
        let raw = match self.sign {
            OrderSign::Debit => self.initial + delta,
            OrderSign::Credit => self.initial - delta,
        };
        round_to_step(raw, self.step)
    }

    /// How much the price has been improved at a given attempt.
    #[must_use]
    pub fn improvement_at(&self, attempt: u32) -> Decimal {
        self.step * Decimal::from(attempt)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test]
    fn debit_ladder_climbs() {
        let ladder = PriceLadder::new(dec!(2.50), dec!(0.05));
        let prices: Vec<Decimal> = (0..4).map(|n| ladder.price_for_attempt(n)).collect();
        assert_eq!(prices, vec![dec!(2.50), dec!(2.55), dec!(2.60), dec!(2.65)]);
    }

    #[test]
    fn credit_ladder_descends() {
        let ladder = PriceLadder::new(dec!(-1.00), dec!(0.05));
        let prices: Vec<Decimal> = (0..2).map(|n| ladder.price_for_attempt(n)).collect();
        assert_eq!(prices, vec![dec!(-1.00), dec!(-1.05)]);
    }

    #[test]
    fn rungs_are_rounded_to_the_step() {
        // 2.52 is not on the 0.05 grid; every rung should be.
        let ladder = PriceLadder::new(dec!(2.52), dec!(0.05));
        assert_eq!(ladder.price_for_attempt(0), dec!(2.50));
        assert_eq!(ladder.price_for_attempt(1), dec!(2.55));
    }

    #[test]
    fn credit_ladder_may_cross_zero() {
        let ladder = PriceLadder::new(dec!(-0.05), dec!(0.05));
        assert_eq!(ladder.price_for_attempt(2), dec!(-0.15));
        // Classification is fixed by the initial price, not per rung.
        assert_eq!(ladder.sign(), OrderSign::Credit);
    }

    #[test_case("SPX", dec!(0.05); "spx index")]
    #[test_case("$SPX", dec!(0.05); "spx with prefix")]
    #[test_case("SPXW", dec!(0.05); "spx weekly")]
    #[test_case("spxw", dec!(0.05); "case insensitive")]
    #[test_case("SPY", dec!(0.01); "etf")]
    #[test_case("QQQ", dec!(0.01); "other etf")]
    fn tick_table(underlying: &str, expected: Decimal) {
        assert_eq!(tick_for(underlying), expected);
    }

    #[test]
    fn for_underlying_uses_the_tick() {
        let ladder = PriceLadder::for_underlying(dec!(2.50), "SPY");
        assert_eq!(ladder.step(), dec!(0.01));
        assert_eq!(ladder.price_for_attempt(3), dec!(2.53));
    }

    #[test]
    fn round_to_step_nearest() {
        assert_eq!(round_to_step(dec!(2.52), dec!(0.05)), dec!(2.50));
        assert_eq!(round_to_step(dec!(2.53), dec!(0.05)), dec!(2.55));
        assert_eq!(round_to_step(dec!(-1.02), dec!(0.05)), dec!(-1.00));
    }

    proptest! {
        #[test]
        fn debit_ladders_strictly_increase(
            initial_cents in 5i64..10_000,
            attempt in 0u32..75,
        ) {
            let initial = Decimal::new(initial_cents, 2);
            let ladder = PriceLadder::new(initial, dec!(0.05));
            let here = ladder.price_for_attempt(attempt);
            let next = ladder.price_for_attempt(attempt + 1);
            prop_assert!(next > here, "{next} should exceed {here}");
        }

        #[test]
        fn credit_ladders_strictly_decrease(
            initial_cents in 5i64..10_000,
            attempt in 0u32..75,
        ) {
            let initial = Decimal::new(-initial_cents, 2);
            let ladder = PriceLadder::new(initial, dec!(0.05));
            let here = ladder.price_for_attempt(attempt);
            let next = ladder.price_for_attempt(attempt + 1);
            prop_assert!(next < here, "{next} should be below {here}");
        }

        #[test]
        fn every_rung_is_on_the_grid(
            initial_cents in -10_000i64..10_000,
            attempt in 0u32..75,
        ) {
            let ladder = PriceLadder::new(Decimal::new(initial_cents, 2), dec!(0.05));
            let price = ladder.price_for_attempt(attempt);
            let remainder = (price / dec!(0.05)).fract();
            prop_assert_eq!(remainder, Decimal::ZERO);
        }
    }
}
