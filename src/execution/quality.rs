//! Fill-quality tracking.
//!
//! Slippage is `(actual − expected) / expected × 10000`, sign-inverted for
//! sells so that positive always means adverse.

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::domain::Side;

#[derive(Debug, Clone)]
pub struct FillQualityRecord {
    pub symbol: String,
    pub side: Side,
    pub expected_price: Decimal,
    pub actual_price: Decimal,
    pub slippage_bps: Decimal,
}

pub struct QualityTracker {
    records: RwLock<Vec<FillQualityRecord>>,
    max_size: usize,
}

impl QualityTracker {
    pub fn new(max_size: usize) -> Self {
        Self {
            records: RwLock::new(Vec::with_capacity(max_size)),
            max_size,
        }
    }

    /// Record one fill; returns the computed slippage bps, or `None` when
    /// the expected price is zero.
    pub fn record_fill(
        &self,
        symbol: &str,
        side: Side,
        expected: Decimal,
        actual: Decimal,
    ) -> Option<Decimal> {
        if expected.is_zero() {
            return None;
        }

        let mut slippage = (actual - expected) / expected * Decimal::from(10_000);
        if side == Side::Sell {
            slippage = -slippage;
        }

        let mut records = self.records.write();
        records.push(FillQualityRecord {
            symbol: symbol.to_string(),
            side,
            expected_price: expected,
            actual_price: actual,
            slippage_bps: slippage,
        });
        if records.len() > self.max_size {
            let excess = records.len() - self.max_size;
            records.drain(..excess);
        }

        Some(slippage)
    }

    pub fn average_slippage_bps(&self) -> Decimal {
        let records = self.records.read();
        if records.is_empty() {
            return Decimal::ZERO;
        }
        let sum: Decimal = records.iter().map(|r| r.slippage_bps).sum();
        sum / Decimal::from(records.len() as i64)
    }

    pub fn recent(&self, n: usize) -> Vec<FillQualityRecord> {
        let records = self.records.read();
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }
}
