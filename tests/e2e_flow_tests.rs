//! Dry-run pipeline: market data → detection → risk gate → simulated fills
//! → execution report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use edgewise::adapter::{FillSimulator, SimulatedGateway};
use edgewise::bus::EventBus;
use edgewise::costmodel::CostModelService;
use edgewise::domain::{
    CycleStatus, FeeTier, OrderBookSnapshot, OrderStatus, PriceLevel, StrategyKind,
};
use edgewise::exchange::GatewayMap;
use edgewise::execution::{ExecutionConfig, ExecutionEngine};
use edgewise::marketdata::MarketDataService;
use edgewise::monitor::Metrics;
use edgewise::order::OrderManager;
use edgewise::risk::{KillSwitch, RiskLimits, RiskManager};
use edgewise::strategy::{default_paths, StrategyModule, TriArbConfig, TriArbModule};
use rust_decimal_macros::dec;

fn snapshot(symbol: &str, bid: (rust_decimal::Decimal, rust_decimal::Decimal), ask: (rust_decimal::Decimal, rust_decimal::Decimal)) -> OrderBookSnapshot {
    OrderBookSnapshot {
        venue: "kcex".into(),
        symbol: symbol.into(),
        bids: vec![PriceLevel::new(bid.0, bid.1)],
        asks: vec![PriceLevel::new(ask.0, ask.1)],
        sequence: 1,
        venue_time: None,
        local_time: None,
    }
}

#[tokio::test]
async fn tri_arb_cycle_fills_in_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let bus = Arc::new(EventBus::new(256, metrics.clone()));
    let md = Arc::new(MarketDataService::new(
        bus.clone(),
        Duration::from_millis(500),
        Duration::from_secs(2),
        12,
    ));

    // Books priced for a ~167 bps raw triangular edge with ample depth.
    md.update_snapshot(snapshot("BTC/USDT", (dec!(49990), dec!(1)), (dec!(50000), dec!(1))));
    md.update_snapshot(snapshot("ETH/BTC", (dec!(0.0599), dec!(10)), (dec!(0.06), dec!(10))));
    md.update_snapshot(snapshot("ETH/USDT", (dec!(3050), dec!(5)), (dec!(3051), dec!(5))));

    let gateway = Arc::new(SimulatedGateway::new(
        "kcex",
        FillSimulator::new(7, 0.0, dec!(2), dec!(5)),
        md.clone(),
        dec!(100000),
        Duration::ZERO,
    ));
    let mut gateways: GatewayMap = HashMap::new();
    gateways.insert("kcex".into(), gateway);

    let cost = Arc::new(CostModelService::new(
        gateways.clone(),
        Duration::from_secs(300),
        12,
    ));
    cost.update_fee_tier(FeeTier {
        venue: "kcex".into(),
        maker_fee_bps: dec!(2),
        taker_fee_bps: dec!(5),
        updated_at: chrono::Utc::now(),
    });

    let module = TriArbModule::new(
        "kcex",
        default_paths(),
        cost.clone(),
        bus.clone(),
        metrics.clone(),
        TriArbConfig { min_edge_bps: 18 },
    );
    let mut signals = bus.subscribe_signals("harness");

    // Replay the books into the module the way the strategy engine would.
    for symbol in ["BTC/USDT", "ETH/BTC", "ETH/USDT"] {
        let book = md.order_book("kcex", symbol).unwrap();
        module.on_order_book(&book);
    }
    let signal = signals.try_recv().expect("detection produced a signal");
    assert_eq!(signal.strategy, StrategyKind::TriArb);

    let orders = Arc::new(OrderManager::new(gateways, bus.clone(), metrics.clone()));
    let risk = Arc::new(RiskManager::new(
        RiskLimits::default(),
        md,
        KillSwitch::load(dir.path().join("ks.json")).unwrap(),
    ));
    let engine = ExecutionEngine::new(
        orders.clone(),
        risk,
        bus.clone(),
        cost,
        metrics,
        ExecutionConfig::default(),
    );

    let mut reports = bus.subscribe_execution_reports("harness");
    let signal_id = signal.signal_id;
    engine.execute_signal(signal).await;

    let report = reports.try_recv().expect("execution report published");
    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.legs.len(), 3);

    // Limit orders at the touch cross the book and fill in full.
    let placed = orders.orders_by_signal(signal_id);
    assert_eq!(placed.len(), 3);
    for order in &placed {
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.filled_size <= order.size);
        assert!(order.avg_fill_price > dec!(0));
    }
}

#[tokio::test]
async fn partial_fill_reported_when_book_is_thin() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let bus = Arc::new(EventBus::new(256, metrics.clone()));
    let md = Arc::new(MarketDataService::new(
        bus.clone(),
        Duration::from_millis(500),
        Duration::from_secs(2),
        12,
    ));
    // A single thin ask level.
    md.update_snapshot(snapshot("BTC/USDT", (dec!(49990), dec!(1)), (dec!(50000), dec!(0.3))));

    let gateway = Arc::new(SimulatedGateway::new(
        "kcex",
        FillSimulator::new(7, 0.0, dec!(2), dec!(5)),
        md.clone(),
        dec!(100000),
        Duration::ZERO,
    ));
    let mut gateways: GatewayMap = HashMap::new();
    gateways.insert("kcex".into(), gateway);
    let orders = Arc::new(OrderManager::new(gateways, bus.clone(), metrics.clone()));

    let request = edgewise::domain::OrderRequest {
        internal_id: uuid::Uuid::now_v7(),
        signal_id: uuid::Uuid::now_v7(),
        venue: "kcex".into(),
        symbol: "BTC/USDT".into(),
        side: edgewise::domain::Side::Buy,
        instrument: edgewise::domain::InstrumentKind::Spot,
        order_type: edgewise::domain::OrderType::Market,
        price: dec!(0),
        size: dec!(1),
        idempotency_key: "thin-book-leg-0".into(),
    };

    let order = orders.submit(request).await.unwrap();
    assert_eq!(order.status, OrderStatus::PartialFill);
    assert_eq!(order.filled_size, dec!(0.3));
    assert_eq!(order.avg_fill_price, dec!(50000));
}
