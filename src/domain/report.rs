//! Execution reporting types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Side, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    Aborted,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStatus::Completed => write!(f, "completed"),
            CycleStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Expected vs actual outcome of one leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegExecution {
    pub symbol: String,
    pub side: Side,
    pub expected_price: Decimal,
    pub actual_price: Decimal,
    pub expected_size: Decimal,
    pub actual_size: Decimal,
    pub slippage_bps: Decimal,
    pub fee: Decimal,
}

/// Published once per execution cycle, completed or aborted.
///
/// `realized_edge_bps` is the mean-leg-slippage approximation; `total_fees`
/// is carried alongside so a fee-inclusive PnL-based edge can be derived
/// downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub signal_id: Uuid,
    pub strategy: StrategyKind,
    pub venue: String,
    pub legs: Vec<LegExecution>,
    pub expected_edge_bps: Decimal,
    pub realized_edge_bps: Decimal,
    pub total_fees: Decimal,
    pub total_slippage_bps: Decimal,
    pub status: CycleStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
