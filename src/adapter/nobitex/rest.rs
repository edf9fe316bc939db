//! nobitex signed REST client.
//!
//! Signature envelope is the shared `timestamp + METHOD + path + body`
//! HMAC-SHA256 hex, carried in the venue's `X-API-KEY` / `X-TIMESTAMP` /
//! `X-SIGNATURE` headers.

use std::collections::HashMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use crate::domain::symbol::extract_asset;
use crate::domain::{
    Balance, CancelAck, EndpointCategory, FeeTier, InstrumentKind, Order, OrderAck, OrderRequest,
    OrderStatus, OrderType, Position, Side,
};
use crate::error::{Error, Result};
use crate::exchange::RateLimiter;

const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

const VENUE: &str = "nobitex";

#[derive(Debug, Deserialize)]
struct AddOrderResponse {
    order: OrderRef,
}

#[derive(Debug, Deserialize)]
struct OrderRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WalletsResponse {
    wallets: Vec<WalletEntry>,
}

#[derive(Debug, Deserialize)]
struct WalletEntry {
    currency: String,
    balance: Decimal,
    blocked: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    positions: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
struct PositionEntry {
    market: String,
    size: Decimal,
    #[serde(rename = "avgEntryPrice")]
    avg_entry_price: Decimal,
    #[serde(rename = "unrealizedPnl", default)]
    unrealized_pnl: Decimal,
    #[serde(rename = "margin", default)]
    margin: Decimal,
}

#[derive(Debug, Deserialize)]
struct FeesResponse {
    #[serde(rename = "makerFee")]
    maker_fee: Decimal,
    #[serde(rename = "takerFee")]
    taker_fee: Decimal,
}

#[derive(Debug, Deserialize)]
struct OpenOrdersResponse {
    orders: Vec<OpenOrderEntry>,
}

#[derive(Debug, Deserialize)]
struct OpenOrderEntry {
    id: u64,
    market: String,
    #[serde(rename = "side")]
    side: String,
    #[serde(rename = "execution")]
    execution: String,
    price: Decimal,
    amount: Decimal,
    #[serde(rename = "matchedAmount", default)]
    matched_amount: Decimal,
}

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
        let payload = body.as_ref().map(|b| b.to_string()).unwrap_or_default();

        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        if !self.api_key.is_empty() {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let signature = self.sign(&format!("{timestamp}{method}{path}{payload}"));
            request = request
                .header("X-API-KEY", &self.api_key)
                .header("X-TIMESTAMP", timestamp)
                .header("X-SIGNATURE", signature);
        }

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

    pub async fn place_order(&self, req: &OrderRequest, market: &str) -> Result<OrderAck> {
        let body = serde_json::json!({
            "market": market,
            "side": req.side.to_string().to_lowercase(),
            "execution": match req.order_type {
                OrderType::Limit => "limit",
                OrderType::Market => "market",
            },
            "price": req.price,
            "amount": req.size,
            "clientRef": req.idempotency_key,
        });

        let response: AddOrderResponse = self
            .request(Method::POST, "/market/orders/add", Some(body), EndpointCategory::OrderPlace)
            .await?;

        Ok(OrderAck {
            internal_id: req.internal_id,
            venue_id: response.order.id.to_string(),
            status: OrderStatus::Acknowledged,
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
        })
    }

    pub async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck> {
        let body = serde_json::json!({ "order": venue_order_id });
        let _: serde_json::Value = self
            .request(
                Method::POST,
                "/market/orders/cancel",
                Some(body),
                EndpointCategory::OrderCancel,
            )
            .await?;

        Ok(CancelAck {
            venue_id: venue_order_id.to_string(),
            status: OrderStatus::Cancelled,
            timestamp: Utc::now(),
        })
    }

    pub async fn open_orders(&self, market: Option<&str>) -> Result<Vec<Order>> {
        let path = match market {
            Some(market) => format!("/market/orders/list?status=open&market={market}"),
            None => "/market/orders/list?status=open".to_string(),
        };
        let response: OpenOrdersResponse = self
            .request(Method::GET, &path, None, EndpointCategory::PrivateData)
            .await?;

        Ok(response
            .orders
            .into_iter()
            .map(|entry| Order {
                internal_id: uuid::Uuid::nil(),
                venue_id: Some(entry.id.to_string()),
                signal_id: uuid::Uuid::nil(),
                venue: VENUE.to_string(),
                symbol: entry.market,
                side: if entry.side.eq_ignore_ascii_case("buy") {
                    Side::Buy
                } else {
                    Side::Sell
                },
                order_type: if entry.execution.eq_ignore_ascii_case("market") {
                    OrderType::Market
                } else {
                    OrderType::Limit
                },
                price: entry.price,
                size: entry.amount,
                filled_size: entry.matched_amount,
                avg_fill_price: Decimal::ZERO,
                status: OrderStatus::Acknowledged,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .collect())
    }

    pub async fn balances(&self) -> Result<HashMap<String, Balance>> {
        let response: WalletsResponse = self
            .request(Method::GET, "/users/wallets/list", None, EndpointCategory::Account)
            .await?;

        Ok(response
            .wallets
            .into_iter()
            .map(|wallet| {
                let asset = wallet.currency.to_uppercase();
                (
                    asset.clone(),
                    Balance {
                        venue: VENUE.to_string(),
                        asset,
                        free: wallet.balance - wallet.blocked,
                        locked: wallet.blocked,
                    },
                )
            })
            .collect())
    }

    pub async fn positions(&self) -> Result<Vec<Position>> {
        let response: PositionsResponse = self
            .request(Method::GET, "/positions/list", None, EndpointCategory::Account)
            .await?;

        Ok(response
            .positions
            .into_iter()
            .map(|entry| Position {
                venue: VENUE.to_string(),
                asset: extract_asset(&entry.market).to_string(),
                instrument: InstrumentKind::Perp,
                size: entry.size,
                entry_price: entry.avg_entry_price,
                unrealized_pnl: entry.unrealized_pnl,
                margin_used: entry.margin,
                updated_at: Utc::now(),
            })
            .collect())
    }

    pub async fn fee_tier(&self) -> Result<FeeTier> {
        let response: FeesResponse = self
            .request(Method::GET, "/users/fees", None, EndpointCategory::Account)
            .await?;

        Ok(FeeTier {
            venue: VENUE.to_string(),
            maker_fee_bps: response.maker_fee * Decimal::from(10_000),
            taker_fee_bps: response.taker_fee * Decimal::from(10_000),
            updated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_envelope_matches_contract() {
        let client = RestClient::new(
            "https://api.example".into(),
            "key".into(),
            "secret".into(),
            RateLimiter::new(),
        );
        // timestamp + METHOD + path + body, hex-encoded sha256 hmac.
        let sig = client.sign("1700000000000POST/market/orders/add{\"a\":1}");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
