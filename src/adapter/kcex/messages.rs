//! kcex wire message shapes.

use serde::{Deserialize, Serialize};

/// `{op: "subscribe", channel, args: [symbol]}`
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub op: &'static str,
    pub channel: &'static str,
    pub args: Vec<String>,
}

impl SubscribeMessage {
    pub fn new(channel: &'static str, symbol: impl Into<String>) -> Self {
        Self {
            op: "subscribe",
            channel,
            args: vec![symbol.into()],
        }
    }
}

/// Envelope around every inbound frame.
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    pub channel: String,
    /// "snapshot" or "delta" for the orderbook channel.
    #[serde(rename = "type", default)]
    pub kind: String,
    pub symbol: String,
    #[serde(default)]
    pub sequence: u64,
    /// Venue epoch millis.
    #[serde(default)]
    pub ts: i64,
    pub data: serde_json::Value,
}

/// Levels as `[price, size]` string pairs.
#[derive(Debug, Deserialize)]
pub struct BookData {
    #[serde(default)]
    pub bids: Vec<[String; 2]>,
    #[serde(default)]
    pub asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
pub struct TradeData {
    pub price: String,
    pub size: String,
    pub side: String,
    #[serde(rename = "tradeId")]
    pub trade_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FundingData {
    pub rate: String,
    #[serde(rename = "nextFundingTime", default)]
    pub next_funding_time: i64,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderResponse {
    pub data: PlaceOrderData,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderData {
    #[serde(rename = "orderId")]
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BalancesResponse {
    pub data: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionsResponse {
    pub data: Vec<PositionEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PositionEntry {
    pub symbol: String,
    pub size: String,
    #[serde(rename = "entryPrice")]
    pub entry_price: String,
    #[serde(rename = "unrealizedPnl", default)]
    pub unrealized_pnl: String,
    #[serde(rename = "marginUsed", default)]
    pub margin_used: String,
}

#[derive(Debug, Deserialize)]
pub struct FeeTierResponse {
    pub data: FeeTierData,
}

#[derive(Debug, Deserialize)]
pub struct FeeTierData {
    #[serde(rename = "makerFeeRate")]
    pub maker_fee_rate: String,
    #[serde(rename = "takerFeeRate")]
    pub taker_fee_rate: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrdersResponse {
    pub data: Vec<OpenOrderEntry>,
}

#[derive(Debug, Deserialize)]
pub struct OpenOrderEntry {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub price: String,
    pub size: String,
    #[serde(rename = "filledSize", default)]
    pub filled_size: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_shape() {
        let msg = SubscribeMessage::new("orderbook", "BTC_USDT");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["op"], "subscribe");
        assert_eq!(json["channel"], "orderbook");
        assert_eq!(json["args"][0], "BTC_USDT");
    }

    #[test]
    fn parses_book_frame() {
        let raw = r#"{
            "channel": "orderbook",
            "type": "delta",
            "symbol": "BTC_USDT",
            "sequence": 42,
            "ts": 1700000000000,
            "data": {"bids": [["50000", "0.5"]], "asks": [["50010", "0.3"]]}
        }"#;
        let envelope: WsEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.kind, "delta");
        let book: BookData = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(book.bids[0][0], "50000");
        assert_eq!(book.asks[0][1], "0.3");
    }
}
