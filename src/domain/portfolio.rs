//! Positions, balances, and fee tiers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::InstrumentKind;

/// Map key for per-(venue, asset) state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueAssetKey {
    pub venue: String,
    pub asset: String,
}

impl VenueAssetKey {
    pub fn new(venue: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            asset: asset.into(),
        }
    }
}

/// Signed position: positive long, negative short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub venue: String,
    pub asset: String,
    pub instrument: InstrumentKind,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Perp only.
    pub margin_used: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub venue: String,
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Venue fee schedule, refreshed periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTier {
    pub venue: String,
    pub maker_fee_bps: Decimal,
    pub taker_fee_bps: Decimal,
    pub updated_at: DateTime<Utc>,
}
