//! kcex signed REST client.
//!
//! Every private call carries an HMAC-SHA256 hex signature over
//! `timestamp + METHOD + path + body` in the `KC-API-*` headers. Requests
//! pass through the per-category token buckets before hitting the wire.

use std::collections::HashMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::debug;

use crate::domain::symbol::extract_asset;
use crate::domain::{
    Balance, CancelAck, FeeTier, InstrumentKind, Order, OrderAck, OrderRequest, OrderStatus,
    OrderType, Position, Side, EndpointCategory,
};
use crate::error::{Error, Result};
use crate::exchange::RateLimiter;

use super::messages::{
    BalancesResponse, FeeTierResponse, OpenOrdersResponse, PlaceOrderResponse, PositionsResponse,
};

const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

const VENUE: &str = "kcex";

pub(super) struct RestClient {
    base_url: String,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
    limiter: RateLimiter,
}

impl RestClient {
    pub fn new(base_url: String, api_key: String, api_secret: String, limiter: RateLimiter) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            api_key,
            api_secret,
            http,
            limiter,
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        category: EndpointCategory,
    ) -> Result<T> {
        self.limiter.acquire(category, 1).await;

        let url = format!("{}{path}", self.base_url);
        let payload = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();

        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        if !self.api_key.is_empty() {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let signature = self.sign(&format!("{timestamp}{method}{path}{payload}"));
            request = request
                .header("KC-API-KEY", &self.api_key)
                .header("KC-API-TIMESTAMP", timestamp)
                .header("KC-API-SIGN", signature);
        }

        debug!(venue = VENUE, %method, path, "rest request");
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(Error::VenueRejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn place_order(&self, req: &OrderRequest, native_symbol: &str) -> Result<OrderAck> {
        let body = serde_json::json!({
            "symbol": native_symbol,
            "side": req.side.to_string(),
            "type": match req.order_type {
                OrderType::Limit => "LIMIT",
                OrderType::Market => "MARKET",
            },
            "price": req.price.to_string(),
            "size": req.size.to_string(),
            "clientOid": req.idempotency_key,
        });

        let response: PlaceOrderResponse = self
            .request(Method::POST, "/api/v1/orders", Some(body), EndpointCategory::OrderPlace)
            .await?;

        Ok(OrderAck {
            internal_id: req.internal_id,
            venue_id: response.data.order_id,
            status: OrderStatus::Acknowledged,
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
        })
    }

    pub async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck> {
        let path = format!("/api/v1/orders/{venue_order_id}");
        let _: serde_json::Value = self
            .request(Method::DELETE, &path, None, EndpointCategory::OrderCancel)
            .await?;

        Ok(CancelAck {
            venue_id: venue_order_id.to_string(),
            status: OrderStatus::Cancelled,
            timestamp: Utc::now(),
        })
    }

    pub async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let path = match symbol {
            Some(symbol) => format!("/api/v1/orders?status=open&symbol={symbol}"),
            None => "/api/v1/orders?status=open".to_string(),
        };
        let response: OpenOrdersResponse = self
            .request(Method::GET, &path, None, EndpointCategory::PrivateData)
            .await?;

        Ok(response
            .data
            .into_iter()
            .filter_map(|entry| {
                Some(Order {
                    internal_id: uuid::Uuid::nil(),
                    venue_id: Some(entry.order_id),
                    signal_id: uuid::Uuid::nil(),
                    venue: VENUE.to_string(),
                    symbol: entry.symbol,
                    side: if entry.side.eq_ignore_ascii_case("buy") {
                        Side::Buy
                    } else {
                        Side::Sell
                    },
                    order_type: if entry.order_type.eq_ignore_ascii_case("market") {
                        OrderType::Market
                    } else {
                        OrderType::Limit
                    },
                    price: entry.price.parse().ok()?,
                    size: entry.size.parse().ok()?,
                    filled_size: entry.filled_size.parse().unwrap_or(Decimal::ZERO),
                    avg_fill_price: Decimal::ZERO,
                    status: OrderStatus::Acknowledged,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
            })
            .collect())
    }

    pub async fn balances(&self) -> Result<HashMap<String, Balance>> {
        let response: BalancesResponse = self
            .request(Method::GET, "/api/v1/accounts", None, EndpointCategory::Account)
            .await?;

        let mut balances = HashMap::new();
        for entry in response.data {
            let (Ok(free), Ok(locked)) =
                (entry.free.parse::<Decimal>(), entry.locked.parse::<Decimal>())
            else {
                continue;
            };
            balances.insert(
                entry.asset.clone(),
                Balance {
                    venue: VENUE.to_string(),
                    asset: entry.asset,
                    free,
                    locked,
                },
            );
        }
        Ok(balances)
    }

    pub async fn positions(&self) -> Result<Vec<Position>> {
        let response: PositionsResponse = self
            .request(Method::GET, "/api/v1/positions", None, EndpointCategory::Account)
            .await?;

        Ok(response
            .data
            .into_iter()
            .filter_map(|entry| {
                Some(Position {
                    venue: VENUE.to_string(),
                    asset: extract_asset(&entry.symbol).to_string(),
                    instrument: InstrumentKind::Perp,
                    size: entry.size.parse().ok()?,
                    entry_price: entry.entry_price.parse().ok()?,
                    unrealized_pnl: entry.unrealized_pnl.parse().unwrap_or(Decimal::ZERO),
                    margin_used: entry.margin_used.parse().unwrap_or(Decimal::ZERO),
                    updated_at: Utc::now(),
                })
            })
            .collect())
    }

    pub async fn fee_tier(&self) -> Result<FeeTier> {
        let response: FeeTierResponse = self
            .request(Method::GET, "/api/v1/fees", None, EndpointCategory::Account)
            .await?;

        let maker: Decimal = response
            .data
            .maker_fee_rate
            .parse()
            .map_err(|_| Error::Gateway("bad maker fee rate".into()))?;
        let taker: Decimal = response
            .data
            .taker_fee_rate
            .parse()
            .map_err(|_| Error::Gateway("bad taker fee rate".into()))?;

        Ok(FeeTier {
            venue: VENUE.to_string(),
            maker_fee_bps: maker * Decimal::from(10_000),
            taker_fee_bps: taker * Decimal::from(10_000),
            updated_at: Utc::now(),
        })
    }
}
