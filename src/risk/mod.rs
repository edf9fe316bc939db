//! Risk management: the single synchronous gate on the execution path.
//!
//! The manager exclusively owns the risk mode, PnL tracker, open-order
//! counters, and kill switch. Validation is deterministic with respect to
//! the state snapshot and the signal, short-circuits on the first failed
//! check, and cannot be bypassed: the execution engine calls it before any
//! order leaves the process.

mod killswitch;
mod pnl;

pub use killswitch::KillSwitch;
pub use pnl::PnlTracker;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::symbol::extract_asset;
use crate::domain::{
    InstrumentKind, Order, OrderStateChange, OrderStatus, Position, RiskMode, Side, TradeSignal,
    VenueAssetKey,
};
use crate::marketdata::MarketDataService;

const PERIODIC_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Invariant violations per minute before the system degrades.
const VIOLATION_THRESHOLD_PER_MINUTE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    KillSwitchActive,
    SystemHalted,
    VenueDegraded,
    DataStale,
    PositionLimitExceeded,
    NotionalLimitExceeded,
    DailyLossCap,
    GlobalOrderLimit,
    VenueOrderLimit,
    SymbolOrderLimit,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::KillSwitchActive => "kill_switch_active",
            RejectReason::SystemHalted => "system_halted",
            RejectReason::VenueDegraded => "venue_degraded",
            RejectReason::DataStale => "data_stale",
            RejectReason::PositionLimitExceeded => "position_limit_exceeded",
            RejectReason::NotionalLimitExceeded => "notional_limit_exceeded",
            RejectReason::DailyLossCap => "daily_loss_cap",
            RejectReason::GlobalOrderLimit => "global_order_limit",
            RejectReason::VenueOrderLimit => "venue_order_limit",
            RejectReason::SymbolOrderLimit => "symbol_order_limit",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of `validate_signal`.
#[derive(Debug, Clone)]
pub enum Validation {
    Approved,
    Rejected { reason: RejectReason, details: String },
}

impl Validation {
    pub fn is_approved(&self) -> bool {
        matches!(self, Validation::Approved)
    }

    pub fn rejection(&self) -> Option<(RejectReason, &str)> {
        match self {
            Validation::Rejected { reason, details } => Some((*reason, details.as_str())),
            Validation::Approved => None,
        }
    }

    fn rejected(reason: RejectReason, details: impl Into<String>) -> Self {
        Validation::Rejected {
            reason,
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenOrderCaps {
    pub global: usize,
    pub per_venue: usize,
    pub per_symbol: usize,
}

impl Default for OpenOrderCaps {
    fn default() -> Self {
        Self {
            global: 50,
            per_venue: 25,
            per_symbol: 10,
        }
    }
}

/// Runtime risk limits, converted from the configuration surface.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Per-asset absolute position cap.
    pub max_position: HashMap<String, Decimal>,
    /// Per-venue gross notional cap.
    pub max_notional_per_venue: HashMap<String, Decimal>,
    pub daily_loss_cap_usdt: Decimal,
    /// Fraction of the loss cap (percent) that flips NORMAL → WARNING.
    pub warning_threshold_pct: u32,
    pub max_open_orders: OpenOrderCaps,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position: HashMap::new(),
            max_notional_per_venue: HashMap::new(),
            daily_loss_cap_usdt: Decimal::from(12_500),
            warning_threshold_pct: 80,
            max_open_orders: OpenOrderCaps::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OrderCounts {
    pub global: usize,
    pub per_venue: HashMap<String, usize>,
    pub per_symbol: HashMap<String, usize>,
}

/// Serialized to the checkpoint store every interval and on warning
/// transitions; restored at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckpoint {
    pub mode: RiskMode,
    pub daily_realized_pnl: Decimal,
    pub daily_unrealized_pnl: Decimal,
    pub positions: Vec<Position>,
    pub open_orders: OrderCounts,
    pub venue_notionals: HashMap<String, Decimal>,
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
    pub at: DateTime<Utc>,
}

struct RiskState {
    mode: RiskMode,
    positions: HashMap<VenueAssetKey, Position>,
    open_orders: OrderCounts,
    venue_notionals: HashMap<String, Decimal>,
    degraded_venues: HashSet<String>,
}

type KillSwitchHook = Box<dyn Fn() + Send + Sync>;
type CheckpointHook = Box<dyn Fn(RiskCheckpoint) + Send + Sync>;

pub struct RiskManager {
    limits: RiskLimits,
    state: RwLock<RiskState>,
    pnl: PnlTracker,
    kill_switch: KillSwitch,
    md: Arc<MarketDataService>,
    on_kill_switch: RwLock<Option<KillSwitchHook>>,
    on_warning_checkpoint: RwLock<Option<CheckpointHook>>,
    violations: Mutex<VecDeque<Instant>>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, md: Arc<MarketDataService>, kill_switch: KillSwitch) -> Self {
        let mode = if kill_switch.is_active() {
            RiskMode::Halted
        } else {
            RiskMode::Normal
        };
        Self {
            limits,
            state: RwLock::new(RiskState {
                mode,
                positions: HashMap::new(),
                open_orders: OrderCounts::default(),
                venue_notionals: HashMap::new(),
                degraded_venues: HashSet::new(),
            }),
            pnl: PnlTracker::new(),
            kill_switch,
            md,
            on_kill_switch: RwLock::new(None),
            on_warning_checkpoint: RwLock::new(None),
            violations: Mutex::new(VecDeque::new()),
        }
    }

    /// One-way registration: the execution engine's cancel-all handler is
    /// installed at wiring time; the engine holds no reference back here.
    pub fn set_kill_switch_callback(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_kill_switch.write() = Some(Box::new(hook));
    }

    /// Fired on transitions that cross 80% of a limit, in addition to the
    /// periodic checkpointer.
    pub fn set_checkpoint_hook(&self, hook: impl Fn(RiskCheckpoint) + Send + Sync + 'static) {
        *self.on_warning_checkpoint.write() = Some(Box::new(hook));
    }

    /// The synchronous gate. Checks run in a fixed order and stop at the
    /// first failure.
    pub fn validate_signal(&self, signal: &TradeSignal) -> Validation {
        if self.kill_switch.is_active() {
            return Validation::rejected(RejectReason::KillSwitchActive, self.kill_switch.reason());
        }

        let state = self.state.read();

        if state.mode == RiskMode::Halted {
            return Validation::rejected(RejectReason::SystemHalted, "");
        }

        if state.degraded_venues.contains(&signal.venue) {
            return Validation::rejected(
                RejectReason::VenueDegraded,
                format!("venue {} is degraded", signal.venue),
            );
        }

        for leg in &signal.legs {
            if self.md.is_blocked(&signal.venue, &leg.symbol) {
                return Validation::rejected(
                    RejectReason::DataStale,
                    format!("data stale for {}:{}", signal.venue, leg.symbol),
                );
            }
        }

        for leg in &signal.legs {
            let asset = extract_asset(&leg.symbol);
            if let Some(cap) = self.limits.max_position.get(asset) {
                let key = VenueAssetKey::new(&signal.venue, asset);
                let current = state
                    .positions
                    .get(&key)
                    .map(|p| p.size.abs())
                    .unwrap_or(Decimal::ZERO);
                let projected = current + leg.size;
                if projected > *cap {
                    return Validation::rejected(
                        RejectReason::PositionLimitExceeded,
                        format!("{asset} position would be {projected} > {cap}"),
                    );
                }
            }
        }

        if let Some(cap) = self.limits.max_notional_per_venue.get(&signal.venue) {
            let current = state
                .venue_notionals
                .get(&signal.venue)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let additional = signal.gross_notional();
            if current + additional > *cap {
                return Validation::rejected(
                    RejectReason::NotionalLimitExceeded,
                    format!("venue {} notional {} > {cap}", signal.venue, current + additional),
                );
            }
        }

        let total_pnl = self.pnl.total();
        if total_pnl <= -self.limits.daily_loss_cap_usdt {
            return Validation::rejected(
                RejectReason::DailyLossCap,
                format!("daily PnL {total_pnl} <= -{}", self.limits.daily_loss_cap_usdt),
            );
        }

        if state.open_orders.global >= self.limits.max_open_orders.global {
            return Validation::rejected(
                RejectReason::GlobalOrderLimit,
                format!("global orders at {}", state.open_orders.global),
            );
        }

        let venue_orders = state
            .open_orders
            .per_venue
            .get(&signal.venue)
            .copied()
            .unwrap_or(0);
        if venue_orders >= self.limits.max_open_orders.per_venue {
            return Validation::rejected(
                RejectReason::VenueOrderLimit,
                format!("venue {} orders at {venue_orders}", signal.venue),
            );
        }

        for leg in &signal.legs {
            let symbol_orders = state
                .open_orders
                .per_symbol
                .get(&leg.symbol)
                .copied()
                .unwrap_or(0);
            if symbol_orders >= self.limits.max_open_orders.per_symbol {
                return Validation::rejected(
                    RejectReason::SymbolOrderLimit,
                    format!("symbol {} orders at {symbol_orders}", leg.symbol),
                );
            }
        }

        Validation::Approved
    }

    /// Account a fill: realized PnL, position, venue notional, then re-check
    /// limits.
    pub fn on_order_fill(&self, order: &Order, realized_pnl: Decimal) {
        self.pnl.add_realized(realized_pnl);

        {
            let mut state = self.state.write();
            let asset = extract_asset(&order.symbol).to_string();
            let key = VenueAssetKey::new(&order.venue, &asset);

            let signed_fill = match order.side {
                Side::Buy => order.filled_size,
                Side::Sell => -order.filled_size,
            };

            match state.positions.get_mut(&key) {
                Some(position) => {
                    position.size += signed_fill;
                    position.updated_at = Utc::now();
                }
                None => {
                    state.positions.insert(
                        key,
                        Position {
                            venue: order.venue.clone(),
                            asset,
                            instrument: InstrumentKind::Spot,
                            size: signed_fill,
                            entry_price: order.avg_fill_price,
                            unrealized_pnl: Decimal::ZERO,
                            margin_used: Decimal::ZERO,
                            updated_at: Utc::now(),
                        },
                    );
                }
            }

            let notional = order.avg_fill_price * order.filled_size;
            *state
                .venue_notionals
                .entry(order.venue.clone())
                .or_insert(Decimal::ZERO) += notional;
        }

        self.check_pnl_limits();
    }

    /// Maintain open-order counters from the order state stream.
    pub fn on_order_state_change(&self, change: &OrderStateChange) {
        let mut state = self.state.write();
        let order = &change.order;

        if change.prev_status == Some(OrderStatus::PendingNew) && !change.new_status.is_terminal() {
            state.open_orders.global += 1;
            *state
                .open_orders
                .per_venue
                .entry(order.venue.clone())
                .or_insert(0) += 1;
            *state
                .open_orders
                .per_symbol
                .entry(order.symbol.clone())
                .or_insert(0) += 1;
        }

        if change.new_status.is_terminal()
            && change.prev_status.is_some_and(|p| p != OrderStatus::PendingNew)
        {
            state.open_orders.global = state.open_orders.global.saturating_sub(1);
            if let Some(count) = state.open_orders.per_venue.get_mut(&order.venue) {
                *count = count.saturating_sub(1);
            }
            if let Some(count) = state.open_orders.per_symbol.get_mut(&order.symbol) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub fn update_unrealized_pnl(&self, amount: Decimal) {
        self.pnl.set_unrealized(amount);
        self.check_pnl_limits();
    }

    fn check_pnl_limits(&self) {
        let total = self.pnl.total();
        let cap = self.limits.daily_loss_cap_usdt;
        let warning_level =
            -cap * Decimal::from(self.limits.warning_threshold_pct) / Decimal::from(100);

        if total <= -cap {
            let reason = format!("daily PnL breach: {total}");
            {
                let mut state = self.state.write();
                state.mode = RiskMode::Halted;
            }
            if !self.kill_switch.is_active() {
                self.kill_switch.activate(&reason);
                error!(total_pnl = %total, cap = %cap, "daily PnL breach, kill switch activated");
                if let Some(hook) = self.on_kill_switch.read().as_ref() {
                    hook();
                }
            }
        } else if total <= warning_level {
            let crossed = {
                let mut state = self.state.write();
                if state.mode == RiskMode::Normal {
                    state.mode = RiskMode::Warning;
                    true
                } else {
                    false
                }
            };
            if crossed {
                warn!(total_pnl = %total, warning_level = %warning_level,
                    "PnL warning threshold reached");
                if let Some(hook) = self.on_warning_checkpoint.read().as_ref() {
                    hook(self.checkpoint());
                }
            }
        }
    }

    /// Mark a venue degraded (reconciliation mismatch). Its signals are
    /// rejected until an operator clears it.
    pub fn mark_venue_degraded(&self, venue: &str) {
        let mut state = self.state.write();
        state.degraded_venues.insert(venue.to_string());
        if state.mode == RiskMode::Normal || state.mode == RiskMode::Warning {
            state.mode = RiskMode::Degraded;
        }
        warn!(venue = %venue, "venue marked degraded, its signals will be rejected");
    }

    pub fn clear_venue_degraded(&self, venue: &str) {
        let mut state = self.state.write();
        state.degraded_venues.remove(venue);
        if state.degraded_venues.is_empty() && state.mode == RiskMode::Degraded {
            state.mode = RiskMode::Normal;
        }
        info!(venue = %venue, "venue degradation cleared");
    }

    /// Record an invariant violation; past the per-minute threshold the
    /// system degrades rather than halting.
    pub fn record_invariant_violation(&self, what: &str) {
        error!(what = %what, "invariant violation");
        let now = Instant::now();
        let mut violations = self.violations.lock();
        violations.push_back(now);
        while violations
            .front()
            .is_some_and(|t| now.duration_since(*t) > Duration::from_secs(60))
        {
            violations.pop_front();
        }
        if violations.len() >= VIOLATION_THRESHOLD_PER_MINUTE {
            let mut state = self.state.write();
            if state.mode == RiskMode::Normal || state.mode == RiskMode::Warning {
                state.mode = RiskMode::Degraded;
                warn!("invariant violation rate exceeded, system degraded");
            }
        }
    }

    pub fn mode(&self) -> RiskMode {
        self.state.read().mode
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.kill_switch.is_active()
    }

    pub fn activate_kill_switch(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.write();
            state.mode = RiskMode::Halted;
        }
        self.kill_switch.activate(reason);
        if let Some(hook) = self.on_kill_switch.read().as_ref() {
            hook();
        }
    }

    /// Operator-initiated resume; any → NORMAL only passes through here.
    pub fn deactivate_kill_switch(&self) {
        self.kill_switch.deactivate();
        let mut state = self.state.write();
        state.mode = RiskMode::Normal;
    }

    pub fn checkpoint(&self) -> RiskCheckpoint {
        let state = self.state.read();
        RiskCheckpoint {
            mode: state.mode,
            daily_realized_pnl: self.pnl.realized(),
            daily_unrealized_pnl: self.pnl.unrealized(),
            positions: state.positions.values().cloned().collect(),
            open_orders: state.open_orders.clone(),
            venue_notionals: state.venue_notionals.clone(),
            kill_switch_active: self.kill_switch.is_active(),
            kill_switch_reason: if self.kill_switch.is_active() {
                Some(self.kill_switch.reason())
            } else {
                None
            },
            at: Utc::now(),
        }
    }

    /// Rebuild positions and PnL from the last persisted checkpoint.
    pub fn restore(&self, checkpoint: &RiskCheckpoint) {
        self.pnl.restore(
            checkpoint.daily_realized_pnl,
            checkpoint.daily_unrealized_pnl,
        );
        let mut state = self.state.write();
        state.positions = checkpoint
            .positions
            .iter()
            .map(|p| (VenueAssetKey::new(&p.venue, &p.asset), p.clone()))
            .collect();
        state.venue_notionals = checkpoint.venue_notionals.clone();
        info!(positions = state.positions.len(), "risk state restored from checkpoint");
    }

    /// 1 s PnL re-check until shutdown.
    pub async fn run_periodic_check(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(PERIODIC_CHECK_INTERVAL);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => self.check_pnl_limits(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::domain::{CostEstimate, LegSpec, OrderType, StrategyKind};
    use crate::monitor::Metrics;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn md_service() -> Arc<MarketDataService> {
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(EventBus::new(64, metrics));
        Arc::new(MarketDataService::new(
            bus,
            Duration::from_millis(500),
            Duration::from_secs(2),
            12,
        ))
    }

    fn seed_book(md: &MarketDataService, symbol: &str) {
        md.update_snapshot(crate::domain::OrderBookSnapshot {
            venue: "kcex".into(),
            symbol: symbol.into(),
            bids: vec![crate::domain::PriceLevel::new(dec!(49990), dec!(5))],
            asks: vec![crate::domain::PriceLevel::new(dec!(50010), dec!(5))],
            sequence: 1,
            ..Default::default()
        });
    }

    fn manager(limits: RiskLimits) -> (Arc<RiskManager>, Arc<MarketDataService>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let md = md_service();
        let ks = KillSwitch::load(dir.path().join("killswitch.json")).unwrap();
        (Arc::new(RiskManager::new(limits, md.clone(), ks)), md, dir)
    }

    fn signal(venue: &str, symbol: &str, side: Side, size: Decimal) -> TradeSignal {
        TradeSignal {
            signal_id: Uuid::now_v7(),
            strategy: StrategyKind::TriArb,
            venue: venue.into(),
            legs: vec![LegSpec {
                symbol: symbol.into(),
                side,
                instrument: InstrumentKind::Spot,
                price: dec!(50000),
                size,
                order_type: OrderType::Limit,
            }],
            expected_edge_bps: dec!(25),
            cost_estimate: CostEstimate::default(),
            confidence: dec!(0.8),
            created_at: Utc::now(),
            market_data_time: Utc::now(),
        }
    }

    #[test]
    fn rejects_on_position_cap() {
        let mut limits = RiskLimits::default();
        limits.max_position.insert("BTC".into(), dec!(1.5));
        let (risk, md, _dir) = manager(limits);
        seed_book(&md, "BTC/USDT");

        let result = risk.validate_signal(&signal("kcex", "BTC/USDT", Side::Buy, dec!(2)));
        let (reason, _) = result.rejection().unwrap();
        assert_eq!(reason.as_str(), "position_limit_exceeded");

        let ok = risk.validate_signal(&signal("kcex", "BTC/USDT", Side::Buy, dec!(1)));
        assert!(ok.is_approved());
    }

    #[test]
    fn rejects_blocked_market_data() {
        let (risk, _md, _dir) = manager(RiskLimits::default());
        // No book seeded: missing feed is blocked.
        let result = risk.validate_signal(&signal("kcex", "BTC/USDT", Side::Buy, dec!(1)));
        let (reason, details) = result.rejection().unwrap();
        assert_eq!(reason, RejectReason::DataStale);
        assert!(details.contains("kcex:BTC/USDT"));
    }

    #[test]
    fn pnl_breach_activates_kill_switch_and_halts() {
        let (risk, md, _dir) = manager(RiskLimits {
            daily_loss_cap_usdt: dec!(12500),
            ..Default::default()
        });
        seed_book(&md, "BTC/USDT");

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        risk.set_kill_switch_callback(move || {
            fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        risk.pnl.add_realized(dec!(-13000));
        risk.check_pnl_limits();

        assert_eq!(risk.mode(), RiskMode::Halted);
        assert!(risk.is_kill_switch_active());
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));

        let result = risk.validate_signal(&signal("kcex", "BTC/USDT", Side::Buy, dec!(0.1)));
        let (reason, _) = result.rejection().unwrap();
        assert_eq!(reason, RejectReason::KillSwitchActive);
    }

    #[test]
    fn warning_mode_at_eighty_percent() {
        let (risk, _md, _dir) = manager(RiskLimits {
            daily_loss_cap_usdt: dec!(1000),
            ..Default::default()
        });
        risk.pnl.add_realized(dec!(-850));
        risk.check_pnl_limits();
        assert_eq!(risk.mode(), RiskMode::Warning);
        assert!(!risk.is_kill_switch_active());
    }

    #[test]
    fn degraded_venue_rejected_others_pass() {
        let (risk, md, _dir) = manager(RiskLimits::default());
        seed_book(&md, "BTC/USDT");
        md.update_snapshot(crate::domain::OrderBookSnapshot {
            venue: "nobitex".into(),
            symbol: "BTC/USDT".into(),
            bids: vec![crate::domain::PriceLevel::new(dec!(49990), dec!(5))],
            asks: vec![crate::domain::PriceLevel::new(dec!(50010), dec!(5))],
            sequence: 1,
            ..Default::default()
        });

        risk.mark_venue_degraded("kcex");
        assert_eq!(risk.mode(), RiskMode::Degraded);

        let blocked = risk.validate_signal(&signal("kcex", "BTC/USDT", Side::Buy, dec!(0.1)));
        assert_eq!(blocked.rejection().unwrap().0, RejectReason::VenueDegraded);

        let ok = risk.validate_signal(&signal("nobitex", "BTC/USDT", Side::Buy, dec!(0.1)));
        assert!(ok.is_approved());

        risk.clear_venue_degraded("kcex");
        assert_eq!(risk.mode(), RiskMode::Normal);
    }

    #[test]
    fn open_order_counters_follow_state_changes() {
        let (risk, md, _dir) = manager(RiskLimits {
            max_open_orders: OpenOrderCaps {
                global: 1,
                per_venue: 1,
                per_symbol: 1,
            },
            ..Default::default()
        });
        seed_book(&md, "BTC/USDT");

        let order = Order {
            internal_id: Uuid::now_v7(),
            venue_id: None,
            signal_id: Uuid::now_v7(),
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: dec!(50000),
            size: dec!(1),
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: OrderStatus::Submitted,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        risk.on_order_state_change(&OrderStateChange {
            order: order.clone(),
            prev_status: Some(OrderStatus::PendingNew),
            new_status: OrderStatus::Submitted,
            timestamp: Utc::now(),
        });

        let full = risk.validate_signal(&signal("kcex", "BTC/USDT", Side::Buy, dec!(0.1)));
        assert_eq!(full.rejection().unwrap().0, RejectReason::GlobalOrderLimit);

        risk.on_order_state_change(&OrderStateChange {
            order,
            prev_status: Some(OrderStatus::Acknowledged),
            new_status: OrderStatus::Filled,
            timestamp: Utc::now(),
        });

        let ok = risk.validate_signal(&signal("kcex", "BTC/USDT", Side::Buy, dec!(0.1)));
        assert!(ok.is_approved());
    }

    #[test]
    fn approved_signal_respects_all_limits_after_projection() {
        let mut limits = RiskLimits::default();
        limits.max_position.insert("BTC".into(), dec!(2));
        limits.max_notional_per_venue.insert("kcex".into(), dec!(100000));
        let (risk, md, _dir) = manager(limits);
        seed_book(&md, "BTC/USDT");

        let sig = signal("kcex", "BTC/USDT", Side::Buy, dec!(1));
        assert!(risk.validate_signal(&sig).is_approved());
        // 50000 * 1 leaves room under the notional cap; a second identical
        // fill-projection would breach it.
        let big = signal("kcex", "BTC/USDT", Side::Buy, dec!(2.5));
        assert_eq!(
            risk.validate_signal(&big).rejection().unwrap().0,
            RejectReason::PositionLimitExceeded
        );
    }
}
