//! Execution engine: turns approved signals into sequenced venue orders.
//!
//! Each signal runs in its own task under a per-cycle deadline. Legs are
//! submitted strictly in order with bounded retries; any leg failure cancels
//! everything placed this cycle (abort-unwind) and reports `aborted`. The
//! cycle is never retried.

mod quality;

pub use quality::{FillQualityRecord, QualityTracker};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::costmodel::CostModelService;
use crate::domain::{
    CycleStatus, ExecutionReport, LegExecution, Order, OrderRequest, StrategyKind, TradeSignal,
};
use crate::error::{Error, Result};
use crate::monitor::Metrics;
use crate::order::OrderManager;
use crate::risk::RiskManager;

/// Retained fill-quality records.
const QUALITY_HISTORY: usize = 1000;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Cycle deadline for triangular signals.
    pub tri_arb_timeout: Duration,
    /// Cycle deadline for basis signals.
    pub basis_arb_timeout: Duration,
    /// Retries per leg beyond the first attempt.
    pub max_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tri_arb_timeout: Duration::from_secs(3),
            basis_arb_timeout: Duration::from_secs(15),
            max_retries: 2,
        }
    }
}

pub struct ExecutionEngine {
    orders: Arc<OrderManager>,
    risk: Arc<RiskManager>,
    bus: Arc<EventBus>,
    cost_model: Arc<CostModelService>,
    quality: Arc<QualityTracker>,
    metrics: Arc<Metrics>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(
        orders: Arc<OrderManager>,
        risk: Arc<RiskManager>,
        bus: Arc<EventBus>,
        cost_model: Arc<CostModelService>,
        metrics: Arc<Metrics>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            orders,
            risk,
            bus,
            cost_model,
            quality: Arc::new(QualityTracker::new(QUALITY_HISTORY)),
            metrics,
            config,
        }
    }

    pub fn quality(&self) -> Arc<QualityTracker> {
        self.quality.clone()
    }

    /// Consume signals until the bus closes or shutdown flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut signals = self.bus.subscribe_signals("execution_engine");
        info!("execution engine started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("execution engine stopped");
                        return;
                    }
                }
                signal = signals.recv() => {
                    let Some(signal) = signal else {
                        info!("signal stream closed, execution engine stopped");
                        return;
                    };
                    let engine = self.clone();
                    tokio::spawn(async move { engine.execute_signal(signal).await });
                }
            }
        }
    }

    /// Gate, timebox, sequence. Public for integration tests that drive
    /// signals directly.
    pub async fn execute_signal(&self, signal: TradeSignal) {
        let verdict = self.risk.validate_signal(&signal);
        if let Some((reason, details)) = verdict.rejection() {
            info!(
                signal_id = %signal.signal_id,
                reason = %reason,
                details = %details,
                "signal rejected by risk manager"
            );
            self.metrics
                .risk_rejections
                .with_label_values(&[reason.as_str()])
                .inc();
            return;
        }

        info!(
            signal_id = %signal.signal_id,
            strategy = %signal.strategy,
            venue = %signal.venue,
            legs = signal.legs.len(),
            edge_bps = %signal.expected_edge_bps,
            "executing signal"
        );
        self.metrics
            .expected_edge_bps
            .with_label_values(&[&signal.strategy.to_string(), &signal.venue])
            .observe(decimal_to_f64(signal.expected_edge_bps));

        let timeout = match signal.strategy {
            StrategyKind::TriArb => self.config.tri_arb_timeout,
            StrategyKind::BasisArb => self.config.basis_arb_timeout,
        };

        let started_at = Utc::now();
        let outcome = tokio::time::timeout(timeout, self.run_cycle(&signal)).await;

        match outcome {
            Ok(CycleOutcome { legs, placed, aborted }) => {
                if aborted {
                    self.abort_unwind(&placed).await;
                    self.publish_report(&signal, legs, CycleStatus::Aborted, started_at);
                } else {
                    self.publish_report(&signal, legs, CycleStatus::Completed, started_at);
                }
            }
            Err(_) => {
                warn!(signal_id = %signal.signal_id, "cycle deadline exceeded, aborting");
                let placed = self.orders.orders_by_signal(signal.signal_id);
                self.abort_unwind(&placed).await;
                self.publish_report(&signal, Vec::new(), CycleStatus::Aborted, started_at);
            }
        }
    }

    async fn run_cycle(&self, signal: &TradeSignal) -> CycleOutcome {
        let mut legs = Vec::with_capacity(signal.legs.len());
        let mut placed = Vec::new();

        for (i, leg) in signal.legs.iter().enumerate() {
            let req = OrderRequest {
                internal_id: Uuid::now_v7(),
                signal_id: signal.signal_id,
                venue: signal.venue.clone(),
                symbol: leg.symbol.clone(),
                side: leg.side,
                instrument: leg.instrument,
                order_type: leg.order_type,
                price: leg.price,
                size: leg.size,
                idempotency_key: format!("{}-leg-{i}", signal.signal_id),
            };

            let order = match self.submit_with_retry(req).await {
                Ok(order) => order,
                Err(e) => {
                    error!(
                        signal_id = %signal.signal_id,
                        leg = i,
                        error = %e,
                        "leg failed, aborting cycle"
                    );
                    return CycleOutcome {
                        legs,
                        placed,
                        aborted: true,
                    };
                }
            };

            let slippage = self
                .quality
                .record_fill(&leg.symbol, leg.side, leg.price, order.avg_fill_price)
                .unwrap_or(Decimal::ZERO);
            self.metrics
                .fill_slippage_bps
                .with_label_values(&[&signal.venue, &leg.symbol])
                .observe(decimal_to_f64(slippage));
            if !order.filled_size.is_zero() {
                self.cost_model
                    .observe_fill(&signal.venue, &leg.symbol, order.filled_size, slippage.abs());
            }

            legs.push(LegExecution {
                symbol: leg.symbol.clone(),
                side: leg.side,
                expected_price: leg.price,
                actual_price: order.avg_fill_price,
                expected_size: leg.size,
                actual_size: order.filled_size,
                slippage_bps: slippage,
                fee: Decimal::ZERO,
            });
            placed.push(order);
        }

        CycleOutcome {
            legs,
            placed,
            aborted: false,
        }
    }

    /// Linear backoff, transient errors only, bounded attempts. The deadline
    /// wrapping the cycle cancels the sleep mid-wait.
    async fn submit_with_retry(&self, req: OrderRequest) -> Result<Order> {
        let mut last_err = Error::Execution("no attempts made".into());
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }

            match self.orders.submit(req.clone()).await {
                Ok(order) => return Ok(order),
                Err(e) => {
                    let transient = e.is_transient();
                    warn!(
                        attempt = attempt + 1,
                        order_id = %req.internal_id,
                        error = %e,
                        transient,
                        "order submission failed"
                    );
                    last_err = e;
                    if !transient {
                        break;
                    }
                }
            }
        }
        Err(Error::Execution(format!(
            "leg failed after {} attempts: {last_err}",
            self.config.max_retries + 1
        )))
    }

    /// Cancel everything placed so far in this cycle.
    async fn abort_unwind(&self, placed: &[Order]) {
        for order in placed {
            if order.is_terminal() {
                continue;
            }
            if let Err(e) = self.orders.cancel(order.internal_id).await {
                error!(order_id = %order.internal_id, error = %e,
                    "failed to cancel order during abort");
            }
        }
    }

    fn publish_report(
        &self,
        signal: &TradeSignal,
        legs: Vec<LegExecution>,
        status: CycleStatus,
        started_at: chrono::DateTime<Utc>,
    ) {
        let total_slippage: Decimal = legs.iter().map(|l| l.slippage_bps).sum();
        let total_fees: Decimal = legs.iter().map(|l| l.fee).sum();
        let realized_edge = if legs.is_empty() {
            Decimal::ZERO
        } else {
            signal.expected_edge_bps - total_slippage / Decimal::from(legs.len() as i64)
        };

        let report = ExecutionReport {
            signal_id: signal.signal_id,
            strategy: signal.strategy,
            venue: signal.venue.clone(),
            legs,
            expected_edge_bps: signal.expected_edge_bps,
            realized_edge_bps: realized_edge,
            total_fees,
            total_slippage_bps: total_slippage,
            status,
            started_at,
            completed_at: Utc::now(),
        };

        self.metrics
            .execution_reports
            .with_label_values(&[&signal.strategy.to_string(), &status.to_string()])
            .inc();
        if status == CycleStatus::Completed {
            self.metrics
                .realized_edge_bps
                .with_label_values(&[&signal.strategy.to_string(), &signal.venue])
                .observe(decimal_to_f64(realized_edge));
        }

        info!(
            signal_id = %signal.signal_id,
            strategy = %signal.strategy,
            status = %status,
            expected_edge_bps = %signal.expected_edge_bps,
            realized_edge_bps = %realized_edge,
            latency_ms = (Utc::now() - started_at).num_milliseconds(),
            "execution report"
        );

        self.bus.publish_execution_report(&report);
    }

    /// Handler installed on the risk manager's kill switch at wiring time.
    pub fn kill_switch_handler(orders: Arc<OrderManager>) -> impl Fn() + Send + Sync {
        move || {
            error!("kill switch: cancelling all orders");
            let orders = orders.clone();
            tokio::spawn(async move { orders.cancel_all().await });
        }
    }
}

struct CycleOutcome {
    legs: Vec<LegExecution>,
    placed: Vec<Order>,
    aborted: bool,
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}
