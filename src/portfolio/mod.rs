//! Portfolio state: balances and positions per (venue, asset).
//!
//! Dry-run and live state live in separate namespaces so paper fills never
//! contaminate live accounting.

mod reconciler;

pub use reconciler::{Reconciler, ReconcilerConfig};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::domain::symbol::{extract_asset, perp_symbol};
use crate::domain::{Balance, Order, Position, Side, TradingMode, VenueAssetKey};
use crate::marketdata::MarketDataService;

pub struct PortfolioManager {
    balances: RwLock<HashMap<VenueAssetKey, Balance>>,
    positions: RwLock<HashMap<VenueAssetKey, Position>>,
    realized_pnl: RwLock<Decimal>,
    md: Arc<MarketDataService>,
    /// Namespace tag carried into analytics rows.
    mode: TradingMode,
}

impl PortfolioManager {
    pub fn new(md: Arc<MarketDataService>, mode: TradingMode) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            realized_pnl: RwLock::new(Decimal::ZERO),
            md,
            mode,
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn update_balance(&self, venue: &str, asset: &str, free: Decimal, locked: Decimal) {
        let key = VenueAssetKey::new(venue, asset);
        self.balances.write().insert(
            key,
            Balance {
                venue: venue.to_string(),
                asset: asset.to_string(),
                free,
                locked,
            },
        );
    }

    pub fn update_position(&self, position: Position) {
        let key = VenueAssetKey::new(&position.venue, &position.asset);
        self.positions.write().insert(key, position);
    }

    /// Apply a fill to the quote balance: buys spend, sells earn.
    pub fn on_fill(&self, order: &Order) {
        let asset = extract_asset(&order.symbol);
        let key = VenueAssetKey::new(&order.venue, asset);
        let notional = order.avg_fill_price * order.filled_size;

        let mut balances = self.balances.write();
        if let Some(balance) = balances.get_mut(&key) {
            match order.side {
                Side::Buy => balance.free -= notional,
                Side::Sell => balance.free += notional,
            }
        }
    }

    pub fn add_realized_pnl(&self, pnl: Decimal) {
        *self.realized_pnl.write() += pnl;
    }

    pub fn realized_pnl(&self) -> Decimal {
        *self.realized_pnl.read()
    }

    /// Mark-to-market: Σ over open perp positions of `(mid − entry) × size`.
    pub fn unrealized_pnl(&self) -> Decimal {
        let positions = self.positions.read();
        let mut total = Decimal::ZERO;
        for (key, position) in positions.iter() {
            if position.size.is_zero() {
                continue;
            }
            let symbol = perp_symbol(&position.asset);
            let Some(mid) = self.md.mid_price(&key.venue, &symbol) else {
                continue;
            };
            total += (mid - position.entry_price) * position.size;
        }
        total
    }

    /// Net signed size for an asset across venues.
    pub fn net_exposure(&self, asset: &str) -> Decimal {
        self.positions
            .read()
            .iter()
            .filter(|(key, _)| key.asset == asset)
            .map(|(_, p)| p.size)
            .sum()
    }

    pub fn balance(&self, venue: &str, asset: &str) -> Option<Balance> {
        self.balances
            .read()
            .get(&VenueAssetKey::new(venue, asset))
            .cloned()
    }

    pub fn position(&self, venue: &str, asset: &str) -> Option<Position> {
        self.positions
            .read()
            .get(&VenueAssetKey::new(venue, asset))
            .cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::domain::{InstrumentKind, OrderBookSnapshot, OrderStatus, OrderType, PriceLevel};
    use crate::monitor::Metrics;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use uuid::Uuid;

    fn md() -> Arc<MarketDataService> {
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(EventBus::new(64, metrics));
        Arc::new(MarketDataService::new(
            bus,
            Duration::from_millis(500),
            Duration::from_secs(2),
            12,
        ))
    }

    fn filled_order(side: Side, price: Decimal, size: Decimal) -> Order {
        Order {
            internal_id: Uuid::now_v7(),
            venue_id: None,
            signal_id: Uuid::now_v7(),
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            side,
            order_type: OrderType::Limit,
            price,
            size,
            filled_size: size,
            avg_fill_price: price,
            status: OrderStatus::Filled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fills_move_quote_balance() {
        let pm = PortfolioManager::new(md(), TradingMode::DryRun);
        pm.update_balance("kcex", "BTC", dec!(100000), dec!(0));

        pm.on_fill(&filled_order(Side::Buy, dec!(50000), dec!(0.5)));
        assert_eq!(pm.balance("kcex", "BTC").unwrap().free, dec!(75000));

        pm.on_fill(&filled_order(Side::Sell, dec!(52000), dec!(0.5)));
        assert_eq!(pm.balance("kcex", "BTC").unwrap().free, dec!(101000));
    }

    #[test]
    fn unrealized_pnl_marks_to_mid() {
        let md = md();
        md.update_snapshot(OrderBookSnapshot {
            venue: "kcex".into(),
            symbol: "BTCUSDT".into(),
            bids: vec![PriceLevel::new(dec!(50990), dec!(1))],
            asks: vec![PriceLevel::new(dec!(51010), dec!(1))],
            sequence: 1,
            ..Default::default()
        });
        let pm = PortfolioManager::new(md, TradingMode::DryRun);

        pm.update_position(Position {
            venue: "kcex".into(),
            asset: "BTC".into(),
            instrument: InstrumentKind::Perp,
            size: dec!(2),
            entry_price: dec!(50000),
            unrealized_pnl: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            updated_at: Utc::now(),
        });

        // Mid 51000, entry 50000, size 2 → +2000.
        assert_eq!(pm.unrealized_pnl(), dec!(2000));
    }

    #[test]
    fn net_exposure_sums_across_venues() {
        let pm = PortfolioManager::new(md(), TradingMode::DryRun);
        for (venue, size) in [("kcex", dec!(2)), ("nobitex", dec!(-0.5))] {
            pm.update_position(Position {
                venue: venue.into(),
                asset: "BTC".into(),
                instrument: InstrumentKind::Perp,
                size,
                entry_price: dec!(50000),
                unrealized_pnl: Decimal::ZERO,
                margin_used: Decimal::ZERO,
                updated_at: Utc::now(),
            });
        }
        assert_eq!(pm.net_exposure("BTC"), dec!(1.5));
    }
}
