//! Piecewise-linear slippage curves.

use rust_decimal::Decimal;

/// One calibration point: order size in base units → expected slippage bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlippagePoint {
    pub size: Decimal,
    pub slippage_bps: Decimal,
}

impl SlippagePoint {
    pub const fn new(size: Decimal, slippage_bps: Decimal) -> Self {
        Self { size, slippage_bps }
    }
}

/// Size → bps curve. Sizes below the first point clamp to the first value,
/// above the last point clamp to the last; interior sizes interpolate
/// linearly.
#[derive(Debug, Clone)]
pub struct SlippageCurve {
    points: Vec<SlippagePoint>,
}

impl SlippageCurve {
    pub fn new(points: Vec<SlippagePoint>) -> Self {
        let mut curve = Self { points };
        curve.sort();
        curve
    }

    pub fn estimate(&self, order_size: Decimal) -> Decimal {
        let Some(first) = self.points.first() else {
            // No calibration at all; a mid-curve guess.
            return Decimal::from(5);
        };
        if order_size <= first.size {
            return first.slippage_bps;
        }

        let last = self.points[self.points.len() - 1];
        if order_size >= last.size {
            return last.slippage_bps;
        }

        for window in self.points.windows(2) {
            let (prev, curr) = (window[0], window[1]);
            if order_size <= curr.size {
                let ratio = (order_size - prev.size) / (curr.size - prev.size);
                return prev.slippage_bps + ratio * (curr.slippage_bps - prev.slippage_bps);
            }
        }
        last.slippage_bps
    }

    /// Replace the curve with points fitted from observed fills.
    pub fn refit(&mut self, points: Vec<SlippagePoint>) {
        if points.is_empty() {
            return;
        }
        self.points = points;
        self.sort();
    }

    fn sort(&mut self) {
        self.points.sort_by(|a, b| a.size.cmp(&b.size));
    }
}

impl Default for SlippageCurve {
    fn default() -> Self {
        Self::new(vec![
            SlippagePoint::new(Decimal::new(1, 2), Decimal::from(1)),
            SlippagePoint::new(Decimal::new(1, 1), Decimal::from(2)),
            SlippagePoint::new(Decimal::from(1), Decimal::from(5)),
            SlippagePoint::new(Decimal::from(10), Decimal::from(10)),
            SlippagePoint::new(Decimal::from(100), Decimal::from(20)),
            SlippagePoint::new(Decimal::from(1000), Decimal::from(50)),
        ])
    }
}
