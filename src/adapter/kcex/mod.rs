//! kcex venue adapter: one public WebSocket for market data, signed REST for
//! trading and account state.

mod messages;
mod rest;
mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::error;

use crate::domain::symbol::{map_symbol, KCEX_SYMBOLS};
use crate::domain::{
    Balance, CancelAck, EndpointCategory, FeeTier, FundingRate, Order, OrderAck, OrderBookDelta,
    OrderRequest, Position, Trade,
};
use crate::error::Result;
use crate::exchange::{RateLimiter, VenueGateway};
use crate::monitor::Metrics;

use rest::RestClient;
use ws::WsClient;

pub struct KcexGateway {
    ws: Arc<WsClient>,
    rest: RestClient,
    shutdown: watch::Receiver<bool>,
}

impl KcexGateway {
    pub fn new(
        ws_url: String,
        rest_url: String,
        api_key: String,
        api_secret: String,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let limiter = RateLimiter::new();
        limiter.add_bucket(EndpointCategory::PublicData, 40, 20);
        limiter.add_bucket(EndpointCategory::PrivateData, 20, 10);
        limiter.add_bucket(EndpointCategory::OrderPlace, 15, 7);
        limiter.add_bucket(EndpointCategory::OrderCancel, 25, 12);
        limiter.add_bucket(EndpointCategory::Account, 10, 5);

        Self {
            ws: Arc::new(WsClient::new(ws_url, metrics)),
            rest: RestClient::new(rest_url, api_key, api_secret, limiter),
            shutdown,
        }
    }

    fn native(&self, canonical: &str) -> String {
        map_symbol(canonical, KCEX_SYMBOLS).to_string()
    }
}

#[async_trait]
impl VenueGateway for KcexGateway {
    async fn connect(&self) -> Result<()> {
        let ws = self.ws.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = ws.run(shutdown).await {
                // Five consecutive failures: fatal for this venue.
                error!(venue = "kcex", error = %e, "websocket task terminated");
            }
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The run task observes the shared shutdown signal and closes the
        // socket; nothing else to release here.
        Ok(())
    }

    fn name(&self) -> &str {
        "kcex"
    }

    async fn subscribe_order_book(&self, symbol: &str) -> Result<mpsc::Receiver<OrderBookDelta>> {
        Ok(self.ws.subscribe_order_book(&self.native(symbol), symbol))
    }

    async fn subscribe_trades(&self, symbol: &str) -> Result<mpsc::Receiver<Trade>> {
        Ok(self.ws.subscribe_trades(&self.native(symbol), symbol))
    }

    async fn subscribe_funding(&self, symbol: &str) -> Result<mpsc::Receiver<FundingRate>> {
        Ok(self.ws.subscribe_funding(&self.native(symbol), symbol))
    }

    async fn request_snapshot(&self, symbol: &str) -> Result<()> {
        self.ws.request_snapshot(&self.native(symbol));
        Ok(())
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck> {
        self.rest.place_order(req, &self.native(&req.symbol)).await
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck> {
        self.rest.cancel_order(venue_order_id).await
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let native = symbol.map(|s| self.native(s));
        self.rest.open_orders(native.as_deref()).await
    }

    async fn balances(&self) -> Result<HashMap<String, Balance>> {
        self.rest.balances().await
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        self.rest.positions().await
    }

    async fn fee_tier(&self) -> Result<FeeTier> {
        self.rest.fee_tier().await
    }
}
