//! nobitex public WebSocket client.
//!
//! nobitex frames carry an `event` discriminator and a `payload` object, and
//! book levels arrive as numeric pairs. Reconnect policy matches the venue
//! contract: 100 ms base backoff doubling to 30 s, five consecutive failures
//! fatal, full resubscribe (snapshot-first) after every reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::domain::{FundingRate, OrderBookDelta, PriceLevel, Side, Trade};
use crate::error::{Error, Result};
use crate::monitor::Metrics;

const RECONNECT_BASE: Duration = Duration::from_millis(100);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBER_BUFFER: usize = 256;

const VENUE: &str = "nobitex";

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    market: String,
    #[serde(default)]
    seq: u64,
    #[serde(default)]
    time: i64,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BookPayload {
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    price: Decimal,
    amount: Decimal,
    #[serde(rename = "orderSide")]
    order_side: String,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct FundingPayload {
    rate: Decimal,
    #[serde(rename = "nextAt", default)]
    next_at: i64,
}

enum Command {
    Subscribe { channel: &'static str, market: String },
}

pub(super) struct WsClient {
    url: String,
    canonical: RwLock<HashMap<String, String>>,
    book_subs: RwLock<HashMap<String, mpsc::Sender<OrderBookDelta>>>,
    trade_subs: RwLock<HashMap<String, mpsc::Sender<Trade>>>,
    funding_subs: RwLock<HashMap<String, mpsc::Sender<FundingRate>>>,
    subscriptions: RwLock<Vec<(&'static str, String)>>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    metrics: Arc<Metrics>,
}

impl WsClient {
    pub fn new(url: String, metrics: Arc<Metrics>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        Self {
            url,
            canonical: RwLock::new(HashMap::new()),
            book_subs: RwLock::new(HashMap::new()),
            trade_subs: RwLock::new(HashMap::new()),
            funding_subs: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
            commands,
            command_rx: parking_lot::Mutex::new(Some(command_rx)),
            metrics,
        }
    }

    fn register(&self, channel: &'static str, market: &str, canonical: &str) {
        self.canonical
            .write()
            .insert(market.to_string(), canonical.to_string());
        self.subscriptions.write().push((channel, market.to_string()));
        let _ = self.commands.send(Command::Subscribe {
            channel,
            market: market.to_string(),
        });
    }

    pub fn subscribe_order_book(&self, market: &str, canonical: &str) -> mpsc::Receiver<OrderBookDelta> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.book_subs.write().insert(market.to_string(), tx);
        self.register("orderbook", market, canonical);
        rx
    }

    pub fn subscribe_trades(&self, market: &str, canonical: &str) -> mpsc::Receiver<Trade> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.trade_subs.write().insert(market.to_string(), tx);
        self.register("trades", market, canonical);
        rx
    }

    pub fn subscribe_funding(&self, market: &str, canonical: &str) -> mpsc::Receiver<FundingRate> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.funding_subs.write().insert(market.to_string(), tx);
        self.register("funding", market, canonical);
        rx
    }

    pub fn request_snapshot(&self, market: &str) {
        let _ = self.commands.send(Command::Subscribe {
            channel: "orderbook",
            market: market.to_string(),
        });
    }

    fn subscribe_frame(channel: &str, market: &str) -> String {
        serde_json::json!({
            "op": "subscribe",
            "channel": channel,
            "args": [market],
        })
        .to_string()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Gateway("ws client already running".into()))?;

        let mut failures: u32 = 0;
        let mut backoff = RECONNECT_BASE;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let attempt = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(&self.url)).await;
            let mut stream = match attempt {
                Ok(Ok((stream, _response))) => {
                    info!(venue = VENUE, "websocket connected");
                    failures = 0;
                    backoff = RECONNECT_BASE;
                    stream
                }
                outcome => {
                    failures += 1;
                    self.metrics.ws_reconnects.with_label_values(&[VENUE]).inc();
                    match outcome {
                        Ok(Err(e)) => {
                            warn!(venue = VENUE, attempt = failures, error = %e, "websocket connect failed")
                        }
                        _ => warn!(venue = VENUE, attempt = failures, "websocket handshake timed out"),
                    }
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(Error::VenueUnavailable(format!(
                            "{VENUE}: {failures} consecutive connect failures"
                        )));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_CAP);
                    continue;
                }
            };

            let subscriptions = self.subscriptions.read().clone();
            for (channel, market) in subscriptions {
                if let Err(e) = stream
                    .send(Message::Text(Self::subscribe_frame(channel, &market)))
                    .await
                {
                    warn!(venue = VENUE, error = %e, "subscribe send failed");
                }
            }

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            let _ = stream.close(None).await;
                            return Ok(());
                        }
                    }
                    command = command_rx.recv() => {
                        let Some(Command::Subscribe { channel, market }) = command else {
                            return Ok(());
                        };
                        if let Err(e) = stream
                            .send(Message::Text(Self::subscribe_frame(channel, &market)))
                            .await
                        {
                            warn!(venue = VENUE, error = %e, "subscribe send failed");
                            break;
                        }
                    }
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = stream.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!(venue = VENUE, "websocket closed");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!(venue = VENUE, error = %e, "websocket read error");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(venue = VENUE, error = %e, "unparseable frame ignored");
                return;
            }
        };

        let Some(canonical) = self.canonical.read().get(&frame.market).cloned() else {
            return;
        };

        match frame.event.as_str() {
            "orderbook-snapshot" | "orderbook-update" => {
                let payload: BookPayload = match serde_json::from_value(frame.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(venue = VENUE, market = %frame.market, error = %e, "bad book payload");
                        return;
                    }
                };
                let delta = OrderBookDelta {
                    venue: VENUE.to_string(),
                    symbol: canonical,
                    bids: to_levels(&payload.bids),
                    asks: to_levels(&payload.asks),
                    sequence: frame.seq,
                    venue_time: Utc.timestamp_millis_opt(frame.time).single(),
                    snapshot: frame.event == "orderbook-snapshot",
                };
                let subs = self.book_subs.read();
                if let Some(tx) = subs.get(&frame.market) {
                    if tx.try_send(delta).is_err() {
                        self.metrics
                            .bus_dropped_events
                            .with_label_values(&["gateway_book", VENUE])
                            .inc();
                    }
                }
            }
            "trade" => {
                let payload: TradePayload = match serde_json::from_value(frame.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(venue = VENUE, market = %frame.market, error = %e, "bad trade payload");
                        return;
                    }
                };
                let trade = Trade {
                    venue: VENUE.to_string(),
                    symbol: canonical,
                    price: payload.price,
                    size: payload.amount,
                    side: if payload.order_side.eq_ignore_ascii_case("buy") {
                        Side::Buy
                    } else {
                        Side::Sell
                    },
                    trade_id: payload.id.to_string(),
                    timestamp: Utc.timestamp_millis_opt(frame.time).single().unwrap_or_else(Utc::now),
                };
                let subs = self.trade_subs.read();
                if let Some(tx) = subs.get(&frame.market) {
                    let _ = tx.try_send(trade);
                }
            }
            "funding" => {
                let payload: FundingPayload = match serde_json::from_value(frame.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(venue = VENUE, market = %frame.market, error = %e, "bad funding payload");
                        return;
                    }
                };
                let funding = FundingRate {
                    venue: VENUE.to_string(),
                    symbol: canonical,
                    rate: payload.rate,
                    timestamp: Utc.timestamp_millis_opt(frame.time).single().unwrap_or_else(Utc::now),
                    next_time: Utc.timestamp_millis_opt(payload.next_at).single(),
                };
                let subs = self.funding_subs.read();
                if let Some(tx) = subs.get(&frame.market) {
                    let _ = tx.try_send(funding);
                }
            }
            _ => {}
        }
    }
}

fn to_levels(pairs: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
    pairs
        .iter()
        .map(|(price, size)| PriceLevel::new(*price, *size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn snapshot_and_update_events() {
        let ws = Arc::new(WsClient::new(
            "wss://example.invalid".into(),
            Arc::new(Metrics::new().unwrap()),
        ));
        let mut rx = ws.subscribe_order_book("BTCUSDT", "BTC/USDT");

        ws.handle_frame(
            r#"{"event":"orderbook-snapshot","market":"BTCUSDT","seq":1,"time":1700000000000,
               "payload":{"bids":[[50000, 1.5]],"asks":[[50010, 2]]}}"#,
        );
        let snap = rx.try_recv().unwrap();
        assert!(snap.snapshot);
        assert_eq!(snap.bids[0], PriceLevel::new(dec!(50000), dec!(1.5)));

        ws.handle_frame(
            r#"{"event":"orderbook-update","market":"BTCUSDT","seq":2,"time":1700000000500,
               "payload":{"bids":[[50000, 0]]}}"#,
        );
        let delta = rx.try_recv().unwrap();
        assert!(!delta.snapshot);
        assert_eq!(delta.bids[0].size, dec!(0));
    }
}
