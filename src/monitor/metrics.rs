//! Prometheus metric families.
//!
//! The registry is constructed at wiring time and injected wherever counters
//! are needed; nothing registers against a process-wide default.

use prometheus::{
    exponential_buckets, linear_buckets, Gauge, HistogramOpts, HistogramVec, IntCounter,
    IntCounterVec, IntGaugeVec, Opts, Registry,
};

pub struct Metrics {
    pub registry: Registry,

    /// Labels: event kind, subscriber identity.
    pub bus_dropped_events: IntCounterVec,
    /// Labels: strategy, venue.
    pub signals_total: IntCounterVec,
    /// Labels: rejection reason.
    pub risk_rejections: IntCounterVec,
    /// Labels: venue, symbol.
    pub orders_submitted: IntCounterVec,
    /// Labels: venue.
    pub order_submit_failures: IntCounterVec,
    /// Labels: venue.
    pub order_cancels: IntCounterVec,
    /// Labels: strategy, status.
    pub execution_reports: IntCounterVec,
    /// Labels: venue, symbol.
    pub fill_slippage_bps: HistogramVec,
    /// Labels: strategy, venue.
    pub expected_edge_bps: HistogramVec,
    /// Labels: strategy, venue.
    pub realized_edge_bps: HistogramVec,
    /// Labels: strategy, venue.
    pub tick_to_ack_latency_ms: HistogramVec,
    /// Labels: venue.
    pub ws_reconnects: IntCounterVec,
    /// Labels: venue.
    pub reconciliation_mismatches: IntCounterVec,
    /// Labels: venue.
    pub open_orders: IntGaugeVec,
    pub daily_pnl_usdt: Gauge,
    pub invariant_violations: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let bus_dropped_events = IntCounterVec::new(
            Opts::new("bus_dropped_events_total", "Events dropped on full subscriber buffers"),
            &["event", "subscriber"],
        )?;
        let signals_total = IntCounterVec::new(
            Opts::new("signals_total", "Trade signals emitted by strategy modules"),
            &["strategy", "venue"],
        )?;
        let risk_rejections = IntCounterVec::new(
            Opts::new("risk_rejections_total", "Signals rejected by the risk gate"),
            &["reason"],
        )?;
        let orders_submitted = IntCounterVec::new(
            Opts::new("orders_submitted_total", "Orders submitted to venues"),
            &["venue", "symbol"],
        )?;
        let order_submit_failures = IntCounterVec::new(
            Opts::new("order_submit_failures_total", "Order submissions that failed"),
            &["venue"],
        )?;
        let order_cancels = IntCounterVec::new(
            Opts::new("order_cancels_total", "Order cancels issued"),
            &["venue"],
        )?;
        let execution_reports = IntCounterVec::new(
            Opts::new("execution_reports_total", "Execution cycles by outcome"),
            &["strategy", "status"],
        )?;
        let fill_slippage_bps = HistogramVec::new(
            HistogramOpts::new("fill_slippage_bps", "Per-fill slippage in basis points")
                .buckets(linear_buckets(-50.0, 5.0, 30)?),
            &["venue", "symbol"],
        )?;
        let expected_edge_bps = HistogramVec::new(
            HistogramOpts::new("expected_edge_bps", "Expected net edge of emitted signals")
                .buckets(linear_buckets(0.0, 5.0, 30)?),
            &["strategy", "venue"],
        )?;
        let realized_edge_bps = HistogramVec::new(
            HistogramOpts::new("realized_edge_bps", "Realized edge of completed cycles")
                .buckets(linear_buckets(-50.0, 5.0, 30)?),
            &["strategy", "venue"],
        )?;
        let tick_to_ack_latency_ms = HistogramVec::new(
            HistogramOpts::new("tick_to_ack_latency_ms", "Market data tick to order ack latency")
                .buckets(exponential_buckets(1.0, 2.0, 12)?),
            &["strategy", "venue"],
        )?;
        let ws_reconnects = IntCounterVec::new(
            Opts::new("ws_reconnects_total", "WebSocket reconnect attempts"),
            &["venue"],
        )?;
        let reconciliation_mismatches = IntCounterVec::new(
            Opts::new("reconciliation_mismatches_total", "Reconciliation mismatches above threshold"),
            &["venue"],
        )?;
        let open_orders = IntGaugeVec::new(
            Opts::new("open_orders", "Currently open (non-terminal) orders"),
            &["venue"],
        )?;
        let daily_pnl_usdt = Gauge::new("daily_pnl_usdt", "Total daily PnL, UTC day")?;
        let invariant_violations =
            IntCounter::new("invariant_violations_total", "Logged invariant violations")?;

        registry.register(Box::new(bus_dropped_events.clone()))?;
        registry.register(Box::new(signals_total.clone()))?;
        registry.register(Box::new(risk_rejections.clone()))?;
        registry.register(Box::new(orders_submitted.clone()))?;
        registry.register(Box::new(order_submit_failures.clone()))?;
        registry.register(Box::new(order_cancels.clone()))?;
        registry.register(Box::new(execution_reports.clone()))?;
        registry.register(Box::new(fill_slippage_bps.clone()))?;
        registry.register(Box::new(expected_edge_bps.clone()))?;
        registry.register(Box::new(realized_edge_bps.clone()))?;
        registry.register(Box::new(tick_to_ack_latency_ms.clone()))?;
        registry.register(Box::new(ws_reconnects.clone()))?;
        registry.register(Box::new(reconciliation_mismatches.clone()))?;
        registry.register(Box::new(open_orders.clone()))?;
        registry.register(Box::new(daily_pnl_usdt.clone()))?;
        registry.register(Box::new(invariant_violations.clone()))?;

        Ok(Self {
            registry,
            bus_dropped_events,
            signals_total,
            risk_rejections,
            orders_submitted,
            order_submit_failures,
            order_cancels,
            execution_reports,
            fill_slippage_bps,
            expected_edge_bps,
            realized_edge_bps,
            tick_to_ack_latency_ms,
            ws_reconnects,
            reconciliation_mismatches,
            open_orders,
            daily_pnl_usdt,
            invariant_violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_gathers_all_families() {
        let metrics = Metrics::new().unwrap();
        metrics.bus_dropped_events.with_label_values(&["order_book", "strategy"]).inc();
        metrics.risk_rejections.with_label_values(&["data_stale"]).inc();

        let families = metrics.registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "bus_dropped_events_total"));
        assert!(families.iter().any(|f| f.get_name() == "risk_rejections_total"));
    }
}
