//! Venue gateway abstraction.
//!
//! One trait covers real venue adapters and the dry-run simulator, so the
//! order manager and reconciler are indifferent to where fills come from.

mod ratelimit;

pub use ratelimit::{RateLimiter, TokenBucket};

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{
    Balance, CancelAck, FeeTier, FundingRate, Order, OrderAck, OrderBookDelta, OrderRequest,
    Position, Trade,
};
use crate::error::Result;

/// Uniform capability set over a trading venue.
///
/// Subscription methods return bounded receivers that end when the
/// connection closes. Trading methods are one-shot request/response.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    fn name(&self) -> &str;

    async fn subscribe_order_book(&self, symbol: &str) -> Result<mpsc::Receiver<OrderBookDelta>>;
    async fn subscribe_trades(&self, symbol: &str) -> Result<mpsc::Receiver<Trade>>;
    async fn subscribe_funding(&self, symbol: &str) -> Result<mpsc::Receiver<FundingRate>>;

    /// Ask the venue for a fresh full book (sequence-gap resync). The
    /// snapshot arrives on the order-book stream flagged as such.
    async fn request_snapshot(&self, _symbol: &str) -> Result<()> {
        Ok(())
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck>;
    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck>;
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>>;

    async fn balances(&self) -> Result<HashMap<String, Balance>>;
    async fn positions(&self) -> Result<Vec<Position>>;
    async fn fee_tier(&self) -> Result<FeeTier>;
}

/// Gateways keyed by venue name, shared across the order manager, cost
/// model, and reconciler.
pub type GatewayMap = HashMap<String, std::sync::Arc<dyn VenueGateway>>;
