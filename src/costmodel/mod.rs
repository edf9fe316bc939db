//! Execution cost estimation: fees, slippage, and funding.
//!
//! Stateless per call over cached inputs. Fee tiers refresh on a schedule
//! from each venue; slippage curves may be refitted from observed fills;
//! funding series are appended by the gateway readers.

mod slippage;

pub use slippage::{SlippageCurve, SlippagePoint};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::domain::{CostEstimate, FeeTier, FundingRate, OrderType, Side};
use crate::exchange::GatewayMap;
use crate::marketdata::FeedKey;

/// Fee assumption when a venue's tier is unknown.
const DEFAULT_FEE_BPS: i64 = 10;

/// Fills retained for slippage-curve refits.
const SLIPPAGE_FIT_LOOKBACK: usize = 500;

/// Seam for strategy modules; the simulator-backed tests stub this.
pub trait CostModel: Send + Sync {
    fn estimate(
        &self,
        venue: &str,
        symbol: &str,
        side: Side,
        size: Decimal,
        order_type: OrderType,
    ) -> CostEstimate;
}

pub struct CostModelService {
    fee_tiers: RwLock<HashMap<String, FeeTier>>,
    curves: RwLock<HashMap<FeedKey, SlippageCurve>>,
    funding: RwLock<HashMap<FeedKey, Vec<FundingRate>>>,
    observed_fills: RwLock<HashMap<FeedKey, Vec<SlippagePoint>>>,
    gateways: GatewayMap,
    refresh_interval: Duration,
    funding_lookback: usize,
}

impl CostModelService {
    pub fn new(gateways: GatewayMap, refresh_interval: Duration, funding_lookback: usize) -> Self {
        Self {
            fee_tiers: RwLock::new(HashMap::new()),
            curves: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
            observed_fills: RwLock::new(HashMap::new()),
            gateways,
            refresh_interval,
            funding_lookback,
        }
    }

    fn fee_bps(&self, venue: &str, order_type: OrderType) -> (Decimal, bool) {
        let tiers = self.fee_tiers.read();
        match tiers.get(venue) {
            Some(tier) => {
                let bps = match order_type {
                    OrderType::Market => tier.taker_fee_bps,
                    OrderType::Limit => tier.maker_fee_bps,
                };
                (bps, false)
            }
            None => (Decimal::from(DEFAULT_FEE_BPS), true),
        }
    }

    fn slippage_bps(&self, venue: &str, symbol: &str, size: Decimal) -> Decimal {
        let key = FeedKey::new(venue, symbol);
        {
            let curves = self.curves.read();
            if let Some(curve) = curves.get(&key) {
                return curve.estimate(size);
            }
        }
        let mut curves = self.curves.write();
        curves.entry(key).or_default().estimate(size)
    }

    /// Recency-weighted average of the last N funding rates, expressed in
    /// bps. `None` for symbols with no funding history (spot).
    fn funding_bps(&self, venue: &str, symbol: &str) -> Option<Decimal> {
        let funding = self.funding.read();
        let rates = funding.get(&FeedKey::new(venue, symbol))?;
        if rates.is_empty() {
            return None;
        }

        let n = self.funding_lookback.min(rates.len());
        let recent = &rates[rates.len() - n..];

        let mut sum = Decimal::ZERO;
        let mut total_weight = Decimal::ZERO;
        for (i, rate) in recent.iter().enumerate() {
            let weight = Decimal::from(i as i64 + 1);
            sum += rate.rate * weight;
            total_weight += weight;
        }
        if total_weight.is_zero() {
            return None;
        }
        Some(sum / total_weight * Decimal::from(10_000))
    }

    pub fn update_fee_tier(&self, tier: FeeTier) {
        self.fee_tiers.write().insert(tier.venue.clone(), tier);
    }

    pub fn add_funding_rate(&self, rate: FundingRate) {
        let key = FeedKey::new(&rate.venue, &rate.symbol);
        let mut funding = self.funding.write();
        let series = funding.entry(key).or_default();
        series.push(rate);
        let cap = self.funding_lookback * 2;
        if series.len() > cap {
            let excess = series.len() - cap;
            series.drain(..excess);
        }
    }

    /// Record an observed fill for curve refitting; keeps the last 500 and
    /// refits the venue/symbol curve from them.
    pub fn observe_fill(&self, venue: &str, symbol: &str, size: Decimal, slippage_bps: Decimal) {
        let key = FeedKey::new(venue, symbol);
        let points = {
            let mut fills = self.observed_fills.write();
            let list = fills.entry(key.clone()).or_default();
            list.push(SlippagePoint::new(size, slippage_bps));
            if list.len() > SLIPPAGE_FIT_LOOKBACK {
                let excess = list.len() - SLIPPAGE_FIT_LOOKBACK;
                list.drain(..excess);
            }
            list.clone()
        };

        let mut curves = self.curves.write();
        curves.entry(key).or_default().refit(points);
    }

    pub async fn refresh_fee_tiers(&self) {
        for (name, gateway) in &self.gateways {
            match gateway.fee_tier().await {
                Ok(tier) => {
                    info!(
                        venue = %name,
                        maker_bps = %tier.maker_fee_bps,
                        taker_bps = %tier.taker_fee_bps,
                        "fee tier refreshed"
                    );
                    self.update_fee_tier(tier);
                }
                Err(e) => error!(venue = %name, error = %e, "failed to refresh fee tier"),
            }
        }
    }

    /// Poll each venue for its fee tier on the configured interval.
    pub async fn run_fee_tier_refresher(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.refresh_fee_tiers().await;
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.tick().await; // the immediate first tick
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => self.refresh_fee_tiers().await,
            }
        }
    }
}

impl CostModel for CostModelService {
    fn estimate(
        &self,
        venue: &str,
        symbol: &str,
        _side: Side,
        size: Decimal,
        order_type: OrderType,
    ) -> CostEstimate {
        let (fee_bps, fee_defaulted) = self.fee_bps(venue, order_type);
        let slippage_bps = self.slippage_bps(venue, symbol, size);
        let funding_bps = self.funding_bps(venue, symbol);

        let mut total = fee_bps + slippage_bps;
        if let Some(funding) = funding_bps {
            total += funding;
        }

        let confidence = if fee_defaulted {
            Decimal::new(5, 1)
        } else {
            Decimal::new(8, 1)
        };

        CostEstimate {
            fee_bps,
            slippage_bps,
            funding_bps,
            total_bps: total,
            confidence,
        }
    }
}
