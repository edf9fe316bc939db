//! Strategy engine: dispatches market-data events to detection modules.
//!
//! Modules are stateless with respect to past signals; they cache only
//! current books and funding series. Dispatch is synchronous, in
//! registration order, on the engine task.

mod basis;
mod triangular;

pub use basis::{BasisArbConfig, BasisArbModule};
pub use triangular::{default_paths, TriArbConfig, TriArbModule, TriangularLeg, TriangularPath};

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::bus::EventBus;
use crate::domain::{FundingRate, OrderBookSnapshot};

/// A detection module fed by the engine.
pub trait StrategyModule: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_order_book(&self, snap: &OrderBookSnapshot);
    fn on_funding_rate(&self, rate: &FundingRate);
}

pub struct StrategyEngine {
    modules: Vec<Box<dyn StrategyModule>>,
    bus: Arc<EventBus>,
}

impl StrategyEngine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            modules: Vec::new(),
            bus,
        }
    }

    pub fn register(&mut self, module: Box<dyn StrategyModule>) {
        info!(module = module.name(), "strategy module registered");
        self.modules.push(module);
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Consume book and funding events until the bus closes or shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut books = self.bus.subscribe_order_books("strategy_engine");
        let mut funding = self.bus.subscribe_funding_rates("strategy_engine");

        info!(modules = self.modules.len(), "strategy engine started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("strategy engine stopped");
                        return;
                    }
                }
                snap = books.recv() => {
                    let Some(snap) = snap else { return };
                    for module in &self.modules {
                        module.on_order_book(&snap);
                    }
                }
                rate = funding.recv() => {
                    let Some(rate) = rate else { return };
                    for module in &self.modules {
                        module.on_funding_rate(&rate);
                    }
                }
            }
        }
    }
}
