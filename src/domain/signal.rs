//! Trade signals emitted by strategy modules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{InstrumentKind, OrderType, Side, StrategyKind};

/// Modeled execution cost for one leg, in basis points.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    pub fee_bps: Decimal,
    pub slippage_bps: Decimal,
    /// Present for perp symbols with funding history.
    pub funding_bps: Option<Decimal>,
    pub total_bps: Decimal,
    /// In [0, 1]; 0.5 when inputs fell back to defaults.
    pub confidence: Decimal,
}

/// One order within a multi-leg cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegSpec {
    pub symbol: String,
    pub side: Side,
    pub instrument: InstrumentKind,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
}

/// Immutable after creation. Emitted by a strategy module, consumed by the
/// execution engine, gated by the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Time-ordered UUID (v7).
    pub signal_id: Uuid,
    pub strategy: StrategyKind,
    pub venue: String,
    pub legs: Vec<LegSpec>,
    /// Net of modeled costs; always positive for emitted signals.
    pub expected_edge_bps: Decimal,
    pub cost_estimate: CostEstimate,
    pub confidence: Decimal,
    pub created_at: DateTime<Utc>,
    pub market_data_time: DateTime<Utc>,
}

impl TradeSignal {
    /// Sum of `price × size` over all legs.
    pub fn gross_notional(&self) -> Decimal {
        self.legs.iter().map(|l| l.price * l.size).sum()
    }
}
