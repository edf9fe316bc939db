//! Daily PnL accounting in UTC day buckets.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

pub struct PnlTracker {
    inner: Mutex<PnlState>,
}

struct PnlState {
    realized: Decimal,
    unrealized: Decimal,
    day: NaiveDate,
}

impl PnlTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PnlState {
                realized: Decimal::ZERO,
                unrealized: Decimal::ZERO,
                day: Utc::now().date_naive(),
            }),
        }
    }

    fn roll_day(state: &mut PnlState) {
        let today = Utc::now().date_naive();
        if today > state.day {
            state.realized = Decimal::ZERO;
            state.unrealized = Decimal::ZERO;
            state.day = today;
        }
    }

    /// Accumulates.
    pub fn add_realized(&self, amount: Decimal) {
        let mut state = self.inner.lock();
        Self::roll_day(&mut state);
        state.realized += amount;
    }

    /// Replaces (mark-to-market).
    pub fn set_unrealized(&self, amount: Decimal) {
        let mut state = self.inner.lock();
        Self::roll_day(&mut state);
        state.unrealized = amount;
    }

    pub fn total(&self) -> Decimal {
        let mut state = self.inner.lock();
        Self::roll_day(&mut state);
        state.realized + state.unrealized
    }

    pub fn realized(&self) -> Decimal {
        let mut state = self.inner.lock();
        Self::roll_day(&mut state);
        state.realized
    }

    pub fn unrealized(&self) -> Decimal {
        let mut state = self.inner.lock();
        Self::roll_day(&mut state);
        state.unrealized
    }

    /// Seed from a restored checkpoint.
    pub fn restore(&self, realized: Decimal, unrealized: Decimal) {
        let mut state = self.inner.lock();
        state.realized = realized;
        state.unrealized = unrealized;
        state.day = Utc::now().date_naive();
    }
}

impl Default for PnlTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn realized_accumulates_unrealized_replaces() {
        let tracker = PnlTracker::new();
        tracker.add_realized(dec!(100));
        tracker.add_realized(dec!(-30));
        tracker.set_unrealized(dec!(50));
        tracker.set_unrealized(dec!(-20));

        assert_eq!(tracker.realized(), dec!(70));
        assert_eq!(tracker.unrealized(), dec!(-20));
        assert_eq!(tracker.total(), dec!(50));
    }
}
