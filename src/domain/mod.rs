//! Exchange-agnostic domain types.
//!
//! Everything here is plain data: no locks, no channels, no I/O. Prices,
//! sizes, fees, and PnL are `rust_decimal::Decimal` on every surface; the
//! strategy inner loop alone works in [`FixedPrice`] (scale 10⁹).

mod book;
mod fixed;
mod order;
mod portfolio;
mod report;
mod signal;
pub mod symbol;
mod types;

pub use book::{FundingRate, OrderBookDelta, OrderBookSnapshot, PriceLevel, Trade};
pub use fixed::{FixedPrice, PRICE_SCALE};
pub use order::{CancelAck, Order, OrderAck, OrderRequest, OrderStateChange};
pub use portfolio::{Balance, FeeTier, Position, VenueAssetKey};
pub use report::{CycleStatus, ExecutionReport, LegExecution};
pub use signal::{CostEstimate, LegSpec, TradeSignal};
pub use types::{
    EndpointCategory, FundingRegime, InstrumentKind, OrderStatus, OrderType, RiskMode, Side,
    StrategyKind, TradingMode,
};
