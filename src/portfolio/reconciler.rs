//! Periodic reconciliation against venue-authoritative state.
//!
//! Balances and positions are fetched per venue on a fixed interval. A
//! relative difference above the threshold fires the mismatch callback (P1
//! alert + venue trading block); venue values then overwrite internal state
//! either way.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::exchange::GatewayMap;

use super::PortfolioManager;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Relative mismatch (percent) that raises the alarm.
    pub mismatch_threshold_pct: Decimal,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            mismatch_threshold_pct: Decimal::new(5, 1),
        }
    }
}

type MismatchHook = Box<dyn Fn(&str) + Send + Sync>;

pub struct Reconciler {
    manager: Arc<PortfolioManager>,
    gateways: GatewayMap,
    config: ReconcilerConfig,
    on_mismatch: parking_lot::RwLock<Option<MismatchHook>>,
}

impl Reconciler {
    pub fn new(manager: Arc<PortfolioManager>, gateways: GatewayMap, config: ReconcilerConfig) -> Self {
        Self {
            manager,
            gateways,
            config,
            on_mismatch: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_mismatch_callback(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_mismatch.write() = Some(Box::new(hook));
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.tick().await; // skip the immediate tick
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => self.reconcile_all().await,
            }
        }
    }

    pub async fn reconcile_all(&self) {
        for (venue, gateway) in &self.gateways {
            self.reconcile_venue(venue, gateway.as_ref()).await;
        }
    }

    async fn reconcile_venue(&self, venue: &str, gateway: &dyn crate::exchange::VenueGateway) {
        match gateway.balances().await {
            Ok(balances) => {
                for (asset, venue_balance) in balances {
                    if let Some(internal) = self.manager.balance(venue, &asset) {
                        self.compare(venue, &asset, internal.total(), venue_balance.total(), "balance");
                    }
                    self.manager.update_balance(
                        venue,
                        &asset,
                        venue_balance.free,
                        venue_balance.locked,
                    );
                }
            }
            Err(e) => {
                error!(venue = %venue, error = %e, "reconciliation: failed to fetch balances");
                return;
            }
        }

        match gateway.positions().await {
            Ok(positions) => {
                for venue_position in positions {
                    if let Some(internal) = self.manager.position(venue, &venue_position.asset) {
                        self.compare(
                            venue,
                            &venue_position.asset,
                            internal.size,
                            venue_position.size,
                            "position",
                        );
                    }
                    self.manager.update_position(venue_position);
                }
            }
            Err(e) => {
                error!(venue = %venue, error = %e, "reconciliation: failed to fetch positions");
                return;
            }
        }

        debug!(venue = %venue, "reconciliation completed");
    }

    fn compare(&self, venue: &str, asset: &str, internal: Decimal, authoritative: Decimal, what: &str) {
        if internal.is_zero() {
            return;
        }
        let pct = ((authoritative - internal) / internal).abs() * Decimal::from(100);
        if pct > self.config.mismatch_threshold_pct {
            error!(
                venue = %venue,
                asset = %asset,
                what = %what,
                internal = %internal,
                venue_actual = %authoritative,
                diff_pct = %pct,
                "reconciliation mismatch detected"
            );
            if let Some(hook) = self.on_mismatch.read().as_ref() {
                hook(venue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FillSimulator, SimulatedGateway};
    use crate::bus::EventBus;
    use crate::domain::TradingMode;
    use crate::marketdata::MarketDataService;
    use crate::monitor::Metrics;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<PortfolioManager>, GatewayMap) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(EventBus::new(64, metrics));
        let md = Arc::new(MarketDataService::new(
            bus,
            Duration::from_millis(500),
            Duration::from_secs(2),
            12,
        ));
        let manager = Arc::new(PortfolioManager::new(md.clone(), TradingMode::DryRun));

        let gateway = SimulatedGateway::new(
            "kcex",
            FillSimulator::new(1, 0.0, dec!(2), dec!(5)),
            md,
            dec!(100000),
            Duration::ZERO,
        );
        let mut gateways: GatewayMap = HashMap::new();
        gateways.insert("kcex".into(), Arc::new(gateway));
        (manager, gateways)
    }

    #[tokio::test]
    async fn mismatch_fires_callback_and_overwrites() {
        let (manager, gateways) = setup();
        // Internal says 90k, venue says 100k: 11% > 0.5%.
        manager.update_balance("kcex", "USDT", dec!(90000), dec!(0));

        let reconciler = Arc::new(Reconciler::new(
            manager.clone(),
            gateways,
            ReconcilerConfig::default(),
        ));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        reconciler.set_mismatch_callback(move |_venue| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        reconciler.reconcile_all().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Venue-authoritative value wins.
        assert_eq!(manager.balance("kcex", "USDT").unwrap().free, dec!(100000));
    }

    #[tokio::test]
    async fn small_drift_overwrites_silently() {
        let (manager, gateways) = setup();
        manager.update_balance("kcex", "USDT", dec!(99999), dec!(0));

        let reconciler = Arc::new(Reconciler::new(
            manager.clone(),
            gateways,
            ReconcilerConfig::default(),
        ));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        reconciler.set_mismatch_callback(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        reconciler.reconcile_all().await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(manager.balance("kcex", "USDT").unwrap().free, dec!(100000));
    }
}
