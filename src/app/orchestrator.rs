//! Wiring and task supervision.
//!
//! All singletons (metrics registry, kill switch, stores) are constructed
//! here and injected; nothing hangs off process-wide globals. Cyclic
//! dependencies are broken with one-way callback registration: the risk
//! manager holds the execution engine's cancel-all handler, the reconciler
//! holds the risk manager's degrade hook.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::adapter::{FillSimulator, KcexGateway, NobitexGateway, SimulatedGateway};
use crate::bus::EventBus;
use crate::costmodel::CostModelService;
use crate::domain::{OrderStatus, TradingMode};
use crate::error::{Error, Result};
use crate::exchange::GatewayMap;
use crate::execution::{ExecutionConfig, ExecutionEngine};
use crate::marketdata::{DeltaOutcome, MarketDataService};
use crate::monitor::{AlertManager, AlertSeverity, Metrics};
use crate::order::OrderManager;
use crate::persistence::{AsyncWriter, CheckpointStore, WriteKind};
use crate::portfolio::{PortfolioManager, Reconciler, ReconcilerConfig};
use crate::risk::{KillSwitch, RiskManager};
use crate::strategy::{
    default_paths, BasisArbConfig, BasisArbModule, StrategyEngine, TriArbConfig, TriArbModule,
};

use super::config::Config;

pub struct Orchestrator;

impl Orchestrator {
    /// Build the system and run until `shutdown` flips.
    pub async fn run(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mode = config.system.trading_mode;
        info!(
            instance_id = %config.system.instance_id,
            trading_mode = %mode,
            "starting edgewise"
        );

        let metrics = Arc::new(Metrics::new()?);
        let alerts = Arc::new(AlertManager::new(config.monitoring.alert_channels.clone()));
        let bus = Arc::new(EventBus::new(config.runtime.event_bus_buffer, metrics.clone()));

        for path in [
            &config.persistence.checkpoint_db,
            &config.persistence.analytics_log,
            &config.risk.kill_switch_path,
        ] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Unrecoverable when the checkpoint DB cannot be opened.
        let store = Arc::new(CheckpointStore::open(&config.persistence.checkpoint_db)?);
        let writer = AsyncWriter::spawn(
            store.clone(),
            config.persistence.analytics_log.clone(),
            config.persistence.write_buffer,
        )?;

        let md = Arc::new(MarketDataService::new(
            bus.clone(),
            config.risk.data_freshness.warning(),
            config.risk.data_freshness.block(),
            config.cost_model.funding_rate_lookback_intervals,
        ));

        let gateways = build_gateways(&config, md.clone(), metrics.clone(), shutdown.clone())?;

        let cost_model = Arc::new(CostModelService::new(
            gateways.clone(),
            config.cost_model.fee_tier_refresh_interval(),
            config.cost_model.funding_rate_lookback_intervals,
        ));

        let kill_switch = KillSwitch::load(&config.risk.kill_switch_path)?;
        let risk = Arc::new(RiskManager::new(config.risk.limits(), md.clone(), kill_switch));
        match store.latest_checkpoint() {
            Ok(Some(checkpoint)) => risk.restore(&checkpoint),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read last risk checkpoint"),
        }
        if risk.is_kill_switch_active() {
            warn!("kill switch is ACTIVE; system starts HALTED until operator resume");
        }

        let orders = Arc::new(OrderManager::new(gateways.clone(), bus.clone(), metrics.clone()));
        risk.set_kill_switch_callback(ExecutionEngine::kill_switch_handler(orders.clone()));
        {
            let writer = writer.clone();
            risk.set_checkpoint_hook(move |checkpoint| writer.write_checkpoint(checkpoint));
        }

        let execution = Arc::new(ExecutionEngine::new(
            orders.clone(),
            risk.clone(),
            bus.clone(),
            cost_model.clone(),
            metrics.clone(),
            ExecutionConfig {
                tri_arb_timeout: config.strategies.triangular_arb.fill_timeout(),
                basis_arb_timeout: config.strategies.basis_arb.fill_timeout(),
                max_retries: config.strategies.triangular_arb.max_retries,
            },
        ));

        let portfolio = Arc::new(PortfolioManager::new(md.clone(), mode));
        let reconciler = Arc::new(Reconciler::new(
            portfolio.clone(),
            gateways.clone(),
            ReconcilerConfig {
                interval: config.risk.reconciliation.interval(),
                mismatch_threshold_pct: config.risk.reconciliation.mismatch_threshold_pct,
            },
        ));
        {
            let risk = risk.clone();
            let alerts = alerts.clone();
            let metrics = metrics.clone();
            let writer = writer.clone();
            let threshold = config.risk.reconciliation.mismatch_threshold_pct;
            reconciler.set_mismatch_callback(move |venue| {
                metrics.reconciliation_mismatches.with_label_values(&[venue]).inc();
                alerts.fire(
                    AlertSeverity::P1,
                    "reconciliation_mismatch",
                    format!("diff > {threshold}% on {venue}"),
                    format!("trading blocked for venue {venue} until resolved"),
                );
                risk.mark_venue_degraded(venue);
                writer.write(
                    WriteKind::RiskEvent,
                    serde_json::json!({
                        "event": "reconciliation_mismatch",
                        "venue": venue,
                    }),
                );
            });
        }

        writer.write(
            WriteKind::ConfigAudit,
            serde_json::json!({
                "instance_id": config.system.instance_id,
                "trading_mode": mode.to_string(),
                "venues": config.venues.keys().collect::<Vec<_>>(),
                "tri_min_edge_bps": config.strategies.triangular_arb.min_edge_bps,
                "basis_min_net_edge_bps": config.strategies.basis_arb.min_net_edge_bps,
            }),
        );

        let mut strategies = StrategyEngine::new(bus.clone());
        if config.strategies.triangular_arb.enabled {
            for venue in gateways.keys() {
                let symbols = config.venue_symbols(venue);
                let paths: Vec<_> = default_paths()
                    .into_iter()
                    .filter(|p| p.legs.iter().all(|l| symbols.iter().any(|s| s == l.symbol)))
                    .collect();
                if paths.is_empty() {
                    warn!(venue = %venue, "no triangular paths servable with configured symbols");
                    continue;
                }
                strategies.register(Box::new(TriArbModule::new(
                    venue.clone(),
                    paths,
                    cost_model.clone(),
                    bus.clone(),
                    metrics.clone(),
                    TriArbConfig {
                        min_edge_bps: config.strategies.triangular_arb.min_edge_bps,
                    },
                )));
            }
        }
        if config.strategies.basis_arb.enabled {
            strategies.register(Box::new(BasisArbModule::new(
                gateways.keys().cloned().collect(),
                crate::domain::symbol::CORE_ASSETS.iter().map(|a| a.to_string()).collect(),
                cost_model.clone(),
                bus.clone(),
                metrics.clone(),
                BasisArbConfig {
                    min_net_edge_bps: config.strategies.basis_arb.min_net_edge_bps,
                    holding_horizon_hours: config.strategies.basis_arb.holding_horizon_hours,
                    funding_uncertainty_buffer_bps: config
                        .strategies
                        .basis_arb
                        .funding_uncertainty_buffer_bps,
                },
            )));
        }

        for (name, gateway) in &gateways {
            gateway.connect().await?;
            info!(venue = %name, "venue connected");
        }

        spawn_market_data_readers(&config, &gateways, md.clone()).await;
        spawn_event_taps(
            bus.clone(),
            risk.clone(),
            portfolio.clone(),
            cost_model.clone(),
            writer.clone(),
            shutdown.clone(),
        );

        tokio::spawn(md.clone().run_heartbeat(shutdown.clone()));
        tokio::spawn(risk.clone().run_periodic_check(shutdown.clone()));
        tokio::spawn(cost_model.clone().run_fee_tier_refresher(shutdown.clone()));
        tokio::spawn(reconciler.clone().run(shutdown.clone()));
        tokio::spawn(orders.clone().run_gc(config.risk.order_gc_max_age(), shutdown.clone()));
        tokio::spawn(run_checkpointer(
            risk.clone(),
            writer.clone(),
            config.risk.checkpoint_interval(),
            shutdown.clone(),
        ));
        tokio::spawn(run_pnl_marker(risk.clone(), portfolio.clone(), metrics.clone(), shutdown.clone()));
        tokio::spawn(crate::monitor::serve(
            config.monitoring.ops_listen_addr.clone(),
            metrics.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(strategies.run(shutdown.clone()));
        tokio::spawn(execution.clone().run(shutdown.clone()));

        info!(venues = gateways.len(), "system started");

        // Hold until shutdown.
        let mut shutdown_watch = shutdown.clone();
        while !*shutdown_watch.borrow() {
            if shutdown_watch.changed().await.is_err() {
                break;
            }
        }

        info!("shutting down");
        orders.cancel_all().await;
        for (name, gateway) in &gateways {
            if let Err(e) = gateway.close().await {
                error!(venue = %name, error = %e, "failed to close venue gateway");
            }
        }
        bus.close();
        info!("shutdown complete");
        Ok(())
    }
}

fn build_gateways(
    config: &Config,
    md: Arc<MarketDataService>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> Result<GatewayMap> {
    let mut gateways = GatewayMap::new();

    for (name, venue) in &config.venues {
        if !venue.enabled {
            continue;
        }

        if config.system.trading_mode == TradingMode::DryRun {
            let simulator = FillSimulator::new(
                config.dry_run.seed,
                config.dry_run.reject_rate_pct,
                rust_decimal::Decimal::from(2),
                rust_decimal::Decimal::from(5),
            );
            gateways.insert(
                name.clone(),
                Arc::new(SimulatedGateway::new(
                    name.clone(),
                    simulator,
                    md.clone(),
                    config.dry_run.initial_capital_usdt,
                    config.dry_run.simulated_latency(),
                )),
            );
            continue;
        }

        let api_key = std::env::var(format!("{}_API_KEY", name.to_uppercase())).unwrap_or_default();
        let api_secret =
            std::env::var(format!("{}_API_SECRET", name.to_uppercase())).unwrap_or_default();

        match name.as_str() {
            "kcex" => {
                gateways.insert(
                    name.clone(),
                    Arc::new(KcexGateway::new(
                        venue.ws_url.clone(),
                        venue.rest_url.clone(),
                        api_key,
                        api_secret,
                        metrics.clone(),
                        shutdown.clone(),
                    )),
                );
            }
            "nobitex" => {
                gateways.insert(
                    name.clone(),
                    Arc::new(NobitexGateway::new(
                        venue.ws_url.clone(),
                        venue.rest_url.clone(),
                        api_key,
                        api_secret,
                        metrics.clone(),
                        shutdown.clone(),
                    )),
                );
            }
            other => {
                return Err(Error::Config(format!("unknown venue adapter: {other}")));
            }
        }
    }

    if gateways.is_empty() {
        return Err(Error::Config("no enabled venue produced a gateway".into()));
    }
    Ok(gateways)
}

/// One reader task per (venue, symbol, stream): pushes typed events into the
/// market-data service, requesting a fresh snapshot on sequence gaps.
async fn spawn_market_data_readers(config: &Config, gateways: &GatewayMap, md: Arc<MarketDataService>) {
    for (name, gateway) in gateways {
        for symbol in config.venue_symbols(name) {
            match gateway.subscribe_order_book(&symbol).await {
                Ok(mut rx) => {
                    let md = md.clone();
                    let gateway = gateway.clone();
                    let symbol_owned = symbol.clone();
                    tokio::spawn(async move {
                        while let Some(delta) = rx.recv().await {
                            if delta.snapshot {
                                md.update_snapshot(delta.into_snapshot());
                            } else if md.apply_delta(delta) == DeltaOutcome::GapDetected {
                                if let Err(e) = gateway.request_snapshot(&symbol_owned).await {
                                    error!(symbol = %symbol_owned, error = %e, "snapshot request failed");
                                }
                            }
                        }
                    });
                }
                Err(e) => error!(venue = %name, symbol = %symbol, error = %e, "book subscription failed"),
            }

            match gateway.subscribe_trades(&symbol).await {
                Ok(mut rx) => {
                    let md = md.clone();
                    tokio::spawn(async move {
                        while let Some(trade) = rx.recv().await {
                            md.record_trade(trade);
                        }
                    });
                }
                Err(e) => error!(venue = %name, symbol = %symbol, error = %e, "trade subscription failed"),
            }
        }

        // Funding only exists on perp symbols.
        if let Some(venue) = config.venues.get(name) {
            for symbol in &venue.symbols.perp {
                match gateway.subscribe_funding(symbol).await {
                    Ok(mut rx) => {
                        let md = md.clone();
                        tokio::spawn(async move {
                            while let Some(rate) = rx.recv().await {
                                md.update_funding_rate(rate);
                            }
                        });
                    }
                    Err(e) => {
                        error!(venue = %name, symbol = %symbol, error = %e, "funding subscription failed")
                    }
                }
            }
        }
    }
}

/// Bus taps feeding accounting and persistence: order state changes maintain
/// risk counters and portfolio balances; funding rates feed the cost model;
/// execution reports become analytics rows.
fn spawn_event_taps(
    bus: Arc<EventBus>,
    risk: Arc<RiskManager>,
    portfolio: Arc<PortfolioManager>,
    cost_model: Arc<CostModelService>,
    writer: AsyncWriter,
    shutdown: watch::Receiver<bool>,
) {
    {
        let mut order_states = bus.subscribe_order_states("risk_accounting");
        let risk = risk.clone();
        let portfolio = portfolio.clone();
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    change = order_states.recv() => {
                        let Some(change) = change else { return };
                        risk.on_order_state_change(&change);
                        if matches!(change.new_status, OrderStatus::PartialFill | OrderStatus::Filled) {
                            portfolio.on_fill(&change.order);
                            risk.on_order_fill(&change.order, rust_decimal::Decimal::ZERO);
                        }
                    }
                }
            }
        });
    }

    {
        let mut funding = bus.subscribe_funding_rates("cost_model");
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    rate = funding.recv() => {
                        let Some(rate) = rate else { return };
                        cost_model.add_funding_rate(rate);
                    }
                }
            }
        });
    }

    {
        let mut reports = bus.subscribe_execution_reports("analytics");
        let mut trades = bus.subscribe_trades("analytics");
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    report = reports.recv() => {
                        let Some(report) = report else { return };
                        if let Ok(payload) = serde_json::to_value(&report) {
                            writer.write(WriteKind::Cycle, payload);
                        }
                    }
                    trade = trades.recv() => {
                        let Some(trade) = trade else { return };
                        if let Ok(payload) = serde_json::to_value(&trade) {
                            writer.write(WriteKind::Trade, payload);
                        }
                    }
                }
            }
        });
    }
}

async fn run_checkpointer(
    risk: Arc<RiskManager>,
    writer: AsyncWriter,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let checkpoint = risk.checkpoint();
                writer.write(
                    WriteKind::Pnl,
                    serde_json::json!({
                        "realized": checkpoint.daily_realized_pnl,
                        "unrealized": checkpoint.daily_unrealized_pnl,
                        "mode": checkpoint.mode,
                    }),
                );
                writer.write_checkpoint(checkpoint);
            }
        }
    }
}

/// Mark-to-market loop: recompute unrealized PnL from open positions and
/// feed the risk tracker.
async fn run_pnl_marker(
    risk: Arc<RiskManager>,
    portfolio: Arc<PortfolioManager>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let unrealized = portfolio.unrealized_pnl();
                risk.update_unrealized_pnl(unrealized);
                let total = portfolio.realized_pnl() + unrealized;
                use rust_decimal::prelude::ToPrimitive;
                metrics.daily_pnl_usdt.set(total.to_f64().unwrap_or(0.0));
            }
        }
    }
}
