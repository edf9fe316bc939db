//! Deterministic fill simulation against the live book.
//!
//! Given the same (order, book, seed) the simulator produces the same fill.
//! Reject injection draws from a seeded RNG before any liquidity check, so a
//! configured reject rate shapes dry-run statistics without breaking
//! determinism.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::domain::{OrderBookSnapshot, OrderRequest, OrderStatus, OrderType, PriceLevel, Side};

#[derive(Debug, Clone)]
pub struct SimulatedFill {
    pub fill_price: Decimal,
    pub fill_size: Decimal,
    pub fee: Decimal,
    pub status: OrderStatus,
}

impl SimulatedFill {
    fn rejected() -> Self {
        Self {
            fill_price: Decimal::ZERO,
            fill_size: Decimal::ZERO,
            fee: Decimal::ZERO,
            status: OrderStatus::Rejected,
        }
    }

    fn resting(price: Decimal) -> Self {
        Self {
            fill_price: price,
            fill_size: Decimal::ZERO,
            fee: Decimal::ZERO,
            status: OrderStatus::Acknowledged,
        }
    }
}

pub struct FillSimulator {
    reject_rate_pct: f64,
    maker_fee_bps: Decimal,
    taker_fee_bps: Decimal,
    rng: Mutex<StdRng>,
}

impl FillSimulator {
    pub fn new(seed: u64, reject_rate_pct: f64, maker_fee_bps: Decimal, taker_fee_bps: Decimal) -> Self {
        Self {
            reject_rate_pct,
            maker_fee_bps,
            taker_fee_bps,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Produce the fill an order would get against this book.
    ///
    /// Market orders walk the opposite side level by level; the fill price
    /// is the size-weighted average of consumed levels. Limit orders that
    /// cross the opposite best fill the same way at maker fees; limit orders
    /// that do not cross rest with zero fill. A missing book or empty
    /// opposite side rejects.
    pub fn simulate(&self, order: &OrderRequest, book: Option<&OrderBookSnapshot>) -> SimulatedFill {
        if self.reject_rate_pct > 0.0 {
            let draw: f64 = self.rng.lock().gen_range(0.0..100.0);
            if draw < self.reject_rate_pct {
                return SimulatedFill::rejected();
            }
        }

        let Some(book) = book else {
            return SimulatedFill::rejected();
        };

        let opposite = match order.side {
            Side::Buy => &book.asks,
            Side::Sell => &book.bids,
        };
        if opposite.is_empty() {
            return SimulatedFill::rejected();
        }

        let fee_bps = match order.order_type {
            OrderType::Market => self.taker_fee_bps,
            OrderType::Limit => {
                let best = opposite[0].price;
                let crosses = match order.side {
                    Side::Buy => order.price >= best,
                    Side::Sell => order.price <= best,
                };
                if !crosses {
                    return SimulatedFill::resting(order.price);
                }
                self.maker_fee_bps
            }
        };

        let (fill_price, fill_size) = walk_depth(opposite, order.size);
        if fill_size.is_zero() {
            return SimulatedFill::rejected();
        }

        let fee = fill_price * fill_size * fee_bps / Decimal::from(10_000);
        let status = if fill_size < order.size {
            OrderStatus::PartialFill
        } else {
            OrderStatus::Filled
        };

        SimulatedFill {
            fill_price,
            fill_size,
            fee,
            status,
        }
    }
}

/// Consume liquidity level by level; returns (size-weighted average price,
/// total filled).
fn walk_depth(levels: &[PriceLevel], size: Decimal) -> (Decimal, Decimal) {
    let mut remaining = size;
    let mut total_cost = Decimal::ZERO;
    let mut total_filled = Decimal::ZERO;

    for level in levels {
        if remaining.is_zero() {
            break;
        }
        let take = remaining.min(level.size);
        total_cost += take * level.price;
        total_filled += take;
        remaining -= take;
    }

    if total_filled.is_zero() {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    (total_cost / total_filled, total_filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrumentKind;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn simulator() -> FillSimulator {
        FillSimulator::new(7, 0.0, dec!(2), dec!(5))
    }

    fn order(side: Side, order_type: OrderType, price: Decimal, size: Decimal) -> OrderRequest {
        OrderRequest {
            internal_id: Uuid::now_v7(),
            signal_id: Uuid::now_v7(),
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            side,
            instrument: InstrumentKind::Spot,
            order_type,
            price,
            size,
            idempotency_key: String::new(),
        }
    }

    fn book(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            bids,
            asks,
            sequence: 1,
            ..Default::default()
        }
    }

    #[test]
    fn market_buy_walks_ask_levels() {
        let sim = simulator();
        let book = book(
            vec![],
            vec![
                PriceLevel::new(dec!(50000), dec!(0.5)),
                PriceLevel::new(dec!(50100), dec!(0.5)),
            ],
        );

        let fill = sim.simulate(&order(Side::Buy, OrderType::Market, dec!(0), dec!(1)), Some(&book));
        assert_eq!(fill.status, OrderStatus::Filled);
        assert_eq!(fill.fill_size, dec!(1));
        assert_eq!(fill.fill_price, dec!(50050));
        // Taker fee: 50050 * 1 * 5 / 10000.
        assert_eq!(fill.fee, dec!(25.025));
    }

    #[test]
    fn partial_fill_when_liquidity_short() {
        let sim = simulator();
        let book = book(vec![], vec![PriceLevel::new(dec!(50000), dec!(0.3))]);

        let fill = sim.simulate(&order(Side::Buy, OrderType::Market, dec!(0), dec!(1)), Some(&book));
        assert_eq!(fill.status, OrderStatus::PartialFill);
        assert_eq!(fill.fill_size, dec!(0.3));
        assert_eq!(fill.fill_price, dec!(50000));
    }

    #[test]
    fn limit_crossing_fills_at_maker_fee() {
        let sim = simulator();
        let book = book(vec![], vec![PriceLevel::new(dec!(50000), dec!(1))]);

        let fill = sim.simulate(
            &order(Side::Buy, OrderType::Limit, dec!(50010), dec!(1)),
            Some(&book),
        );
        assert_eq!(fill.status, OrderStatus::Filled);
        // Maker fee: 50000 * 1 * 2 / 10000.
        assert_eq!(fill.fee, dec!(10));
    }

    #[test]
    fn limit_not_crossing_rests() {
        let sim = simulator();
        let book = book(vec![], vec![PriceLevel::new(dec!(50000), dec!(1))]);

        let fill = sim.simulate(
            &order(Side::Buy, OrderType::Limit, dec!(49990), dec!(1)),
            Some(&book),
        );
        assert_eq!(fill.status, OrderStatus::Acknowledged);
        assert_eq!(fill.fill_size, Decimal::ZERO);
    }

    #[test]
    fn missing_book_or_empty_side_rejects() {
        let sim = simulator();
        let fill = sim.simulate(&order(Side::Buy, OrderType::Market, dec!(0), dec!(1)), None);
        assert_eq!(fill.status, OrderStatus::Rejected);

        let empty_asks = book(vec![PriceLevel::new(dec!(49990), dec!(1))], vec![]);
        let fill = sim.simulate(
            &order(Side::Buy, OrderType::Market, dec!(0), dec!(1)),
            Some(&empty_asks),
        );
        assert_eq!(fill.status, OrderStatus::Rejected);
    }

    #[test]
    fn same_seed_same_reject_sequence() {
        let run = |seed: u64| {
            let sim = FillSimulator::new(seed, 50.0, dec!(2), dec!(5));
            let book = book(vec![], vec![PriceLevel::new(dec!(50000), dec!(1))]);
            (0..20)
                .map(|_| {
                    sim.simulate(&order(Side::Buy, OrderType::Market, dec!(0), dec!(0.1)), Some(&book))
                        .status
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(run(42), run(42));
        // Roughly half should reject at 50%.
        let rejects = run(42)
            .iter()
            .filter(|s| **s == OrderStatus::Rejected)
            .count();
        assert!(rejects > 2 && rejects < 18);
    }

    #[test]
    fn sell_side_walks_bids() {
        let sim = simulator();
        let book = book(
            vec![
                PriceLevel::new(dec!(50000), dec!(0.4)),
                PriceLevel::new(dec!(49900), dec!(0.6)),
            ],
            vec![],
        );

        let fill = sim.simulate(&order(Side::Sell, OrderType::Market, dec!(0), dec!(1)), Some(&book));
        assert_eq!(fill.fill_size, dec!(1));
        // 0.4*50000 + 0.6*49900 = 49940.
        assert_eq!(fill.fill_price, dec!(49940));
    }
}
