//! Cross-market basis arbitrage: spot hedged with same-venue perpetuals.
//!
//! Tracks spot and perp books per asset, estimates funding capture over the
//! holding horizon, classifies the funding regime, and emits a two-leg
//! signal when the combined edge clears costs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::{Decimal, MathematicalOps};
use tracing::info;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::costmodel::CostModel;
use crate::domain::symbol::{perp_symbol, spot_symbol};
use crate::domain::{
    FundingRate, FundingRegime, InstrumentKind, LegSpec, OrderBookSnapshot, OrderType, Side,
    StrategyKind, TradeSignal,
};
use crate::marketdata::FeedKey;
use crate::monitor::Metrics;

use super::StrategyModule;

/// Funding observations kept per feed.
const FUNDING_HISTORY: usize = 100;

/// Observations weighted in the capture estimate and regime classifier.
const FUNDING_LOOKBACK: usize = 12;

/// Sample std-dev below this is a stable funding regime.
const REGIME_STDDEV_THRESHOLD: &str = "0.0001";

#[derive(Debug, Clone)]
pub struct BasisArbConfig {
    pub min_net_edge_bps: i64,
    pub holding_horizon_hours: i64,
    /// Extra cost buffer applied when the funding regime is volatile.
    pub funding_uncertainty_buffer_bps: i64,
}

impl Default for BasisArbConfig {
    fn default() -> Self {
        Self {
            min_net_edge_bps: 22,
            holding_horizon_hours: 24,
            funding_uncertainty_buffer_bps: 5,
        }
    }
}

pub struct BasisArbModule {
    venues: Vec<String>,
    assets: Vec<String>,
    spot_books: RwLock<HashMap<FeedKey, OrderBookSnapshot>>,
    perp_books: RwLock<HashMap<FeedKey, OrderBookSnapshot>>,
    funding: RwLock<HashMap<FeedKey, Vec<FundingRate>>>,
    cost_model: Arc<dyn CostModel>,
    bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
    config: BasisArbConfig,
    spot_symbols: Vec<String>,
}

impl BasisArbModule {
    pub fn new(
        venues: Vec<String>,
        assets: Vec<String>,
        cost_model: Arc<dyn CostModel>,
        bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
        config: BasisArbConfig,
    ) -> Self {
        let spot_symbols = assets.iter().map(|a| spot_symbol(a)).collect();
        Self {
            venues,
            assets,
            spot_books: RwLock::new(HashMap::new()),
            perp_books: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
            cost_model,
            bus,
            metrics,
            config,
            spot_symbols,
        }
    }

    fn evaluate(&self, venue: &str, md_time: chrono::DateTime<Utc>) {
        let spot_books = self.spot_books.read();
        let perp_books = self.perp_books.read();

        for asset in &self.assets {
            let spot_sym = spot_symbol(asset);
            let perp_sym = perp_symbol(asset);

            let Some(spot_book) = spot_books.get(&FeedKey::new(venue, &spot_sym)) else {
                continue;
            };
            let Some(perp_book) = perp_books.get(&FeedKey::new(venue, &perp_sym)) else {
                continue;
            };

            let (Some(spot_mid), Some(perp_mid)) = (spot_book.mid_price(), perp_book.mid_price())
            else {
                continue;
            };
            if spot_mid <= Decimal::ZERO {
                continue;
            }

            let basis = (perp_mid - spot_mid) / spot_mid;
            let funding_capture = self.estimate_funding_capture(venue, &perp_sym);
            let regime = self.classify_funding_regime(venue, &perp_sym);

            let gross_edge_bps = (basis.abs() + funding_capture.abs()) * Decimal::from(10_000);

            let mut cost = self.cost_model.estimate(
                venue,
                &spot_sym,
                Side::Buy,
                Decimal::ONE,
                OrderType::Limit,
            );
            if regime == FundingRegime::Volatile {
                cost.total_bps += Decimal::from(self.config.funding_uncertainty_buffer_bps);
            }

            let net_edge_bps = gross_edge_bps - cost.total_bps;
            if net_edge_bps < Decimal::from(self.config.min_net_edge_bps) {
                continue;
            }

            // Perp above spot: buy spot, sell perp; otherwise the reverse.
            let (spot_side, perp_side) = if perp_mid > spot_mid {
                (Side::Buy, Side::Sell)
            } else {
                (Side::Sell, Side::Buy)
            };

            let (Some(spot_ask), Some(perp_bid)) = (spot_book.best_ask(), perp_book.best_bid())
            else {
                continue;
            };
            let size = spot_ask.size.min(perp_bid.size);
            if size.is_zero() {
                continue;
            }

            let signal = TradeSignal {
                signal_id: Uuid::now_v7(),
                strategy: StrategyKind::BasisArb,
                venue: venue.to_string(),
                legs: vec![
                    LegSpec {
                        symbol: spot_sym.clone(),
                        side: spot_side,
                        instrument: InstrumentKind::Spot,
                        price: spot_ask.price,
                        size,
                        order_type: OrderType::Limit,
                    },
                    LegSpec {
                        symbol: perp_sym.clone(),
                        side: perp_side,
                        instrument: InstrumentKind::Perp,
                        price: perp_bid.price,
                        size,
                        order_type: OrderType::Limit,
                    },
                ],
                expected_edge_bps: net_edge_bps,
                confidence: cost.confidence,
                cost_estimate: cost,
                created_at: Utc::now(),
                market_data_time: md_time,
            };

            info!(
                venue = %venue,
                asset = %asset,
                net_edge_bps = %net_edge_bps,
                regime = %regime,
                signal_id = %signal.signal_id,
                "basis-arb signal detected"
            );
            self.metrics
                .signals_total
                .with_label_values(&["BASIS_ARB", venue])
                .inc();
            self.bus.publish_signal(&signal);
        }
    }

    /// Recency-weighted average funding rate × (horizon / 8h funding
    /// interval).
    fn estimate_funding_capture(&self, venue: &str, symbol: &str) -> Decimal {
        let funding = self.funding.read();
        let Some(rates) = funding.get(&FeedKey::new(venue, symbol)) else {
            return Decimal::ZERO;
        };
        if rates.is_empty() {
            return Decimal::ZERO;
        }

        let n = FUNDING_LOOKBACK.min(rates.len());
        let recent = &rates[rates.len() - n..];

        let mut sum = Decimal::ZERO;
        let mut total_weight = Decimal::ZERO;
        for (i, rate) in recent.iter().enumerate() {
            let weight = Decimal::from(i as i64 + 1);
            sum += rate.rate * weight;
            total_weight += weight;
        }
        if total_weight.is_zero() {
            return Decimal::ZERO;
        }

        let avg = sum / total_weight;
        let intervals = Decimal::from(self.config.holding_horizon_hours) / Decimal::from(8);
        avg * intervals
    }

    /// Sample std-dev of recent funding below 10⁻⁴ is STABLE. Sparse history
    /// is conservatively VOLATILE.
    fn classify_funding_regime(&self, venue: &str, symbol: &str) -> FundingRegime {
        let funding = self.funding.read();
        let Some(rates) = funding.get(&FeedKey::new(venue, symbol)) else {
            return FundingRegime::Volatile;
        };
        if rates.len() < 3 {
            return FundingRegime::Volatile;
        }

        let n = FUNDING_LOOKBACK.min(rates.len());
        let recent = &rates[rates.len() - n..];
        let count = Decimal::from(recent.len() as i64);

        let mean: Decimal = recent.iter().map(|r| r.rate).sum::<Decimal>() / count;
        let variance: Decimal = recent
            .iter()
            .map(|r| {
                let diff = r.rate - mean;
                diff * diff
            })
            .sum::<Decimal>()
            / count;

        let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
        let threshold: Decimal = REGIME_STDDEV_THRESHOLD.parse().unwrap_or(Decimal::ZERO);

        if std_dev < threshold {
            FundingRegime::Stable
        } else {
            FundingRegime::Volatile
        }
    }

    fn is_spot(&self, symbol: &str) -> bool {
        self.spot_symbols.iter().any(|s| s == symbol)
    }
}

impl StrategyModule for BasisArbModule {
    fn name(&self) -> &'static str {
        "basis_arb"
    }

    fn on_order_book(&self, snap: &OrderBookSnapshot) {
        if !self.venues.iter().any(|v| v == &snap.venue) {
            return;
        }
        let md_time = snap.local_time.unwrap_or_else(Utc::now);
        let key = FeedKey::new(&snap.venue, &snap.symbol);
        if self.is_spot(&snap.symbol) {
            self.spot_books.write().insert(key, snap.clone());
        } else {
            self.perp_books.write().insert(key, snap.clone());
        }
        self.evaluate(&snap.venue, md_time);
    }

    fn on_funding_rate(&self, rate: &FundingRate) {
        {
            let mut funding = self.funding.write();
            let series = funding
                .entry(FeedKey::new(&rate.venue, &rate.symbol))
                .or_default();
            series.push(rate.clone());
            if series.len() > FUNDING_HISTORY {
                let excess = series.len() - FUNDING_HISTORY;
                series.drain(..excess);
            }
        }
        self.evaluate(&rate.venue, rate.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CostEstimate, PriceLevel};
    use rust_decimal_macros::dec;

    struct ZeroCost;

    impl CostModel for ZeroCost {
        fn estimate(
            &self,
            _venue: &str,
            _symbol: &str,
            _side: Side,
            _size: Decimal,
            _order_type: OrderType,
        ) -> CostEstimate {
            CostEstimate {
                confidence: dec!(1),
                ..Default::default()
            }
        }
    }

    fn module() -> (BasisArbModule, Arc<EventBus>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(EventBus::new(64, metrics.clone()));
        let module = BasisArbModule::new(
            vec!["kcex".into()],
            vec!["BTC".into()],
            Arc::new(ZeroCost),
            bus.clone(),
            metrics,
            BasisArbConfig::default(),
        );
        (module, bus)
    }

    fn book(venue: &str, symbol: &str, bid: (Decimal, Decimal), ask: (Decimal, Decimal)) -> OrderBookSnapshot {
        OrderBookSnapshot {
            venue: venue.into(),
            symbol: symbol.into(),
            bids: vec![PriceLevel::new(bid.0, bid.1)],
            asks: vec![PriceLevel::new(ask.0, ask.1)],
            sequence: 1,
            venue_time: None,
            local_time: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn emits_when_basis_clears_threshold() {
        let (module, bus) = module();
        let mut signals = bus.subscribe_signals("test");

        // Spot mid 50000, perp mid 50150: basis = 30 bps > 22.
        module.on_order_book(&book("kcex", "BTC/USDT", (dec!(49995), dec!(2)), (dec!(50005), dec!(2))));
        module.on_order_book(&book("kcex", "BTCUSDT", (dec!(50145), dec!(3)), (dec!(50155), dec!(3))));

        let signal = signals.try_recv().expect("signal emitted");
        assert_eq!(signal.strategy, StrategyKind::BasisArb);
        assert_eq!(signal.legs.len(), 2);
        // Perp above spot: buy spot, sell perp.
        assert_eq!(signal.legs[0].side, Side::Buy);
        assert_eq!(signal.legs[0].instrument, InstrumentKind::Spot);
        assert_eq!(signal.legs[1].side, Side::Sell);
        assert_eq!(signal.legs[1].instrument, InstrumentKind::Perp);
        // Size capped by the thinner side.
        assert_eq!(signal.legs[0].size, dec!(2));
    }

    #[tokio::test]
    async fn reversed_direction_when_perp_below_spot() {
        let (module, bus) = module();
        let mut signals = bus.subscribe_signals("test");

        module.on_order_book(&book("kcex", "BTC/USDT", (dec!(50145), dec!(2)), (dec!(50155), dec!(2))));
        module.on_order_book(&book("kcex", "BTCUSDT", (dec!(49995), dec!(3)), (dec!(50005), dec!(3))));

        let signal = signals.try_recv().expect("signal emitted");
        assert_eq!(signal.legs[0].side, Side::Sell);
        assert_eq!(signal.legs[1].side, Side::Buy);
    }

    #[tokio::test]
    async fn silent_below_threshold() {
        let (module, bus) = module();
        let mut signals = bus.subscribe_signals("test");

        // Basis = 10 bps < 22, no funding history.
        module.on_order_book(&book("kcex", "BTC/USDT", (dec!(49995), dec!(2)), (dec!(50005), dec!(2))));
        module.on_order_book(&book("kcex", "BTCUSDT", (dec!(50045), dec!(3)), (dec!(50055), dec!(3))));

        assert!(signals.try_recv().is_err());
    }

    #[test]
    fn regime_classification() {
        let (module, _bus) = module();

        // Flat funding: stable.
        for _ in 0..12 {
            module.on_funding_rate(&FundingRate {
                venue: "kcex".into(),
                symbol: "BTCUSDT".into(),
                rate: dec!(0.0001),
                timestamp: Utc::now(),
                next_time: None,
            });
        }
        assert_eq!(
            module.classify_funding_regime("kcex", "BTCUSDT"),
            FundingRegime::Stable
        );

        // Swinging funding: volatile.
        for i in 0..12 {
            module.on_funding_rate(&FundingRate {
                venue: "kcex".into(),
                symbol: "ETHUSDT".into(),
                rate: if i % 2 == 0 { dec!(0.003) } else { dec!(-0.003) },
                timestamp: Utc::now(),
                next_time: None,
            });
        }
        assert_eq!(
            module.classify_funding_regime("kcex", "ETHUSDT"),
            FundingRegime::Volatile
        );
    }

    #[test]
    fn sparse_history_is_volatile() {
        let (module, _bus) = module();
        assert_eq!(
            module.classify_funding_regime("kcex", "BTCUSDT"),
            FundingRegime::Volatile
        );
    }

    #[test]
    fn funding_capture_scales_with_horizon() {
        let (module, _bus) = module();
        for _ in 0..12 {
            module.on_funding_rate(&FundingRate {
                venue: "kcex".into(),
                symbol: "BTCUSDT".into(),
                rate: dec!(0.0001),
                timestamp: Utc::now(),
                next_time: None,
            });
        }
        // 24h horizon / 8h interval = 3 intervals at 1 bps each.
        let capture = module.estimate_funding_capture("kcex", "BTCUSDT");
        assert_eq!(capture, dec!(0.0003));
    }
}
