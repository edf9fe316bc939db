//! Order book types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// `price × size`.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Full book state for one (venue, symbol) feed.
///
/// Invariants at rest: bids strictly descending, asks strictly ascending, no
/// duplicate prices, no zero-size levels. A crossed book (best bid ≥ best
/// ask) is a freshness anomaly, not a structural failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub venue: String,
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub sequence: u64,
    pub venue_time: Option<DateTime<Utc>>,
    pub local_time: Option<DateTime<Utc>>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// `(best_bid + best_ask) / 2`; `None` when either side is empty.
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid.price + ask.price) / Decimal::TWO)
    }

    /// Best bid at or above best ask.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }
}

/// Incremental level updates for one feed. A zero-size level removes that
/// price; a non-zero size inserts or replaces it.
///
/// `snapshot = true` marks a full-book replacement (sent after connect and
/// on sequence-gap resync); the level lists are then the whole book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub venue: String,
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub sequence: u64,
    pub venue_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snapshot: bool,
}

impl OrderBookDelta {
    /// View a snapshot-flagged delta as a full book.
    pub fn into_snapshot(self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            venue: self.venue,
            symbol: self.symbol,
            bids: self.bids,
            asks: self.asks,
            sequence: self.sequence,
            venue_time: self.venue_time,
            local_time: None,
        }
    }
}

/// An executed venue trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub venue: String,
    pub symbol: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: super::Side,
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
}

/// One observation of a perp funding rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub venue: String,
    pub symbol: String,
    pub rate: Decimal,
    pub timestamp: DateTime<Utc>,
    pub next_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    #[test]
    fn mid_price_requires_both_sides() {
        let mut book = OrderBookSnapshot {
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            bids: vec![level(dec!(49990), dec!(1))],
            asks: vec![],
            ..Default::default()
        };
        assert_eq!(book.mid_price(), None);

        book.asks = vec![level(dec!(50010), dec!(1))];
        assert_eq!(book.mid_price(), Some(dec!(50000)));
    }

    #[test]
    fn crossed_book_detection() {
        let book = OrderBookSnapshot {
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            bids: vec![level(dec!(50010), dec!(1))],
            asks: vec![level(dec!(50000), dec!(1))],
            ..Default::default()
        };
        assert!(book.is_crossed());
    }

    #[test]
    fn trade_side_serializes_screaming() {
        let trade = Trade {
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            price: dec!(50000),
            size: dec!(0.1),
            side: Side::Sell,
            trade_id: "t-1".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&trade).unwrap();
        assert!(json.contains("\"SELL\""));
    }
}
