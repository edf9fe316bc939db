//! kcex public WebSocket client.
//!
//! One socket per venue. The run task owns the connection: it subscribes,
//! reads, dispatches to per-symbol channels, and reconnects with exponential
//! backoff (base 100 ms, doubling, 30 s cap). After five consecutive
//! failures the task gives up and reports a fatal venue error. On every
//! reconnect all subscriptions are re-sent, which makes the venue lead with
//! fresh snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::domain::{FundingRate, OrderBookDelta, PriceLevel, Side, Trade};
use crate::error::{Error, Result};
use crate::monitor::Metrics;

use super::messages::{BookData, FundingData, SubscribeMessage, TradeData, WsEnvelope};

const RECONNECT_BASE: Duration = Duration::from_millis(100);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBER_BUFFER: usize = 256;

const VENUE: &str = "kcex";

enum WsCommand {
    Subscribe { channel: &'static str, symbol: String },
}

pub(super) struct WsClient {
    url: String,
    /// venue-native symbol → canonical, for inbound translation.
    canonical: RwLock<HashMap<String, String>>,
    book_subs: RwLock<HashMap<String, mpsc::Sender<OrderBookDelta>>>,
    trade_subs: RwLock<HashMap<String, mpsc::Sender<Trade>>>,
    funding_subs: RwLock<HashMap<String, mpsc::Sender<FundingRate>>>,
    /// (channel, native symbol) pairs re-sent after every reconnect.
    subscriptions: RwLock<Vec<(&'static str, String)>>,
    commands: mpsc::UnboundedSender<WsCommand>,
    command_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<WsCommand>>>,
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

    fn register(&self, channel: &'static str, native: &str, canonical: &str) {
        self.canonical
            .write()
            .insert(native.to_string(), canonical.to_string());
        self.subscriptions.write().push((channel, native.to_string()));
        let _ = self.commands.send(WsCommand::Subscribe {
            channel,
            symbol: native.to_string(),
        });
    }

    pub fn subscribe_order_book(&self, native: &str, canonical: &str) -> mpsc::Receiver<OrderBookDelta> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.book_subs.write().insert(native.to_string(), tx);
        self.register("orderbook", native, canonical);
        rx
    }

    pub fn subscribe_trades(&self, native: &str, canonical: &str) -> mpsc::Receiver<Trade> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.trade_subs.write().insert(native.to_string(), tx);
        self.register("trades", native, canonical);
        rx
    }

    pub fn subscribe_funding(&self, native: &str, canonical: &str) -> mpsc::Receiver<FundingRate> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.funding_subs.write().insert(native.to_string(), tx);
        self.register("funding", native, canonical);
        rx
    }

    /// Re-send the orderbook subscription; the venue answers with a fresh
    /// snapshot.
    pub fn request_snapshot(&self, native: &str) {
        let _ = self.commands.send(WsCommand::Subscribe {
            channel: "orderbook",
            symbol: native.to_string(),
        });
    }

    /// Own the socket until shutdown or permanent failure.
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

            let connect = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(&self.url));
            let mut stream = match connect.await {
                Ok(Ok((stream, response))) => {
                    info!(venue = VENUE, status = %response.status(), "websocket connected");
                    failures = 0;
                    backoff = RECONNECT_BASE;
                    stream
                }
                Ok(Err(e)) => {
                    failures += 1;
                    self.metrics.ws_reconnects.with_label_values(&[VENUE]).inc();
                    warn!(venue = VENUE, attempt = failures, error = %e, "websocket connect failed");
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(Error::VenueUnavailable(format!(
                            "{VENUE}: {failures} consecutive connect failures"
                        )));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_CAP);
                    continue;
                }
                Err(_) => {
                    failures += 1;
                    self.metrics.ws_reconnects.with_label_values(&[VENUE]).inc();
                    warn!(venue = VENUE, attempt = failures, "websocket handshake timed out");
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

            // Re-establish every subscription; the venue leads each
            // orderbook channel with a snapshot frame.
            let subscriptions = self.subscriptions.read().clone();
            for (channel, symbol) in subscriptions {
                let frame = SubscribeMessage::new(channel, symbol);
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if let Err(e) = stream.send(Message::Text(json)).await {
                            warn!(venue = VENUE, error = %e, "subscribe send failed");
                        }
                    }
                    Err(e) => error!(venue = VENUE, error = %e, "subscribe serialize failed"),
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
                        let Some(WsCommand::Subscribe { channel, symbol }) = command else {
                            return Ok(());
                        };
                        let frame = SubscribeMessage::new(channel, symbol);
                        if let Ok(json) = serde_json::to_string(&frame) {
                            if let Err(e) = stream.send(Message::Text(json)).await {
                                warn!(venue = VENUE, error = %e, "subscribe send failed");
                                break;
                            }
                        }
                    }
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = stream.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!(venue = VENUE, "websocket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!(venue = VENUE, error = %e, "websocket read error");
                                break;
                            }
                            None => {
                                info!(venue = VENUE, "websocket stream ended");
                                break;
                            }
                        }
                    }
                }
            }
            // Fall through to reconnect.
        }
    }

    fn handle_frame(&self, text: &str) {
        let envelope: WsEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(venue = VENUE, error = %e, "unparseable frame ignored");
                return;
            }
        };

        match envelope.channel.as_str() {
            "orderbook" => self.handle_book(envelope),
            "trades" => self.handle_trade(envelope),
            "funding" => self.handle_funding(envelope),
            _ => {}
        }
    }

    fn handle_book(&self, envelope: WsEnvelope) {
        let Some(canonical) = self.canonical.read().get(&envelope.symbol).cloned() else {
            return;
        };
        let data: BookData = match serde_json::from_value(envelope.data) {
            Ok(data) => data,
            Err(e) => {
                warn!(venue = VENUE, symbol = %envelope.symbol, error = %e, "bad book frame");
                return;
            }
        };

        let delta = OrderBookDelta {
            venue: VENUE.to_string(),
            symbol: canonical,
            bids: parse_levels(&data.bids),
            asks: parse_levels(&data.asks),
            sequence: envelope.sequence,
            venue_time: Utc.timestamp_millis_opt(envelope.ts).single(),
            snapshot: envelope.kind == "snapshot",
        };

        let subs = self.book_subs.read();
        if let Some(tx) = subs.get(&envelope.symbol) {
            if tx.try_send(delta).is_err() {
                self.metrics
                    .bus_dropped_events
                    .with_label_values(&["gateway_book", VENUE])
                    .inc();
            }
        }
    }

    fn handle_trade(&self, envelope: WsEnvelope) {
        let Some(canonical) = self.canonical.read().get(&envelope.symbol).cloned() else {
            return;
        };
        let data: TradeData = match serde_json::from_value(envelope.data) {
            Ok(data) => data,
            Err(e) => {
                warn!(venue = VENUE, symbol = %envelope.symbol, error = %e, "bad trade frame");
                return;
            }
        };
        let (Ok(price), Ok(size)) = (data.price.parse::<Decimal>(), data.size.parse::<Decimal>())
        else {
            warn!(venue = VENUE, symbol = %envelope.symbol, "bad decimal in trade frame");
            return;
        };

        let trade = Trade {
            venue: VENUE.to_string(),
            symbol: canonical,
            price,
            size,
            side: if data.side.eq_ignore_ascii_case("buy") {
                Side::Buy
            } else {
                Side::Sell
            },
            trade_id: data.trade_id,
            timestamp: Utc.timestamp_millis_opt(envelope.ts).single().unwrap_or_else(Utc::now),
        };

        let subs = self.trade_subs.read();
        if let Some(tx) = subs.get(&envelope.symbol) {
            let _ = tx.try_send(trade);
        }
    }

    fn handle_funding(&self, envelope: WsEnvelope) {
        let Some(canonical) = self.canonical.read().get(&envelope.symbol).cloned() else {
            return;
        };
        let data: FundingData = match serde_json::from_value(envelope.data) {
            Ok(data) => data,
            Err(e) => {
                warn!(venue = VENUE, symbol = %envelope.symbol, error = %e, "bad funding frame");
                return;
            }
        };
        let Ok(rate) = data.rate.parse::<Decimal>() else {
            return;
        };

        let funding = FundingRate {
            venue: VENUE.to_string(),
            symbol: canonical,
            rate,
            timestamp: Utc.timestamp_millis_opt(envelope.ts).single().unwrap_or_else(Utc::now),
            next_time: Utc.timestamp_millis_opt(data.next_funding_time).single(),
        };

        let subs = self.funding_subs.read();
        if let Some(tx) = subs.get(&envelope.symbol) {
            let _ = tx.try_send(funding);
        }
    }
}

fn parse_levels(raw: &[[String; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|pair| {
            let price = pair[0].parse::<Decimal>().ok()?;
            let size = pair[1].parse::<Decimal>().ok()?;
            Some(PriceLevel::new(price, size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client() -> Arc<WsClient> {
        Arc::new(WsClient::new(
            "wss://example.invalid/ws".into(),
            Arc::new(Metrics::new().unwrap()),
        ))
    }

    #[tokio::test]
    async fn book_frames_translate_to_canonical_deltas() {
        let ws = client();
        let mut rx = ws.subscribe_order_book("BTC_USDT", "BTC/USDT");

        ws.handle_frame(
            r#"{"channel":"orderbook","type":"snapshot","symbol":"BTC_USDT","sequence":7,
               "ts":1700000000000,
               "data":{"bids":[["50000","1"]],"asks":[["50010","2"]]}}"#,
        );

        let delta = rx.try_recv().unwrap();
        assert!(delta.snapshot);
        assert_eq!(delta.symbol, "BTC/USDT");
        assert_eq!(delta.sequence, 7);
        assert_eq!(delta.bids[0], PriceLevel::new(dec!(50000), dec!(1)));
    }

    #[tokio::test]
    async fn unknown_symbols_and_garbage_ignored() {
        let ws = client();
        let mut rx = ws.subscribe_order_book("BTC_USDT", "BTC/USDT");

        ws.handle_frame("{not json");
        ws.handle_frame(
            r#"{"channel":"orderbook","type":"delta","symbol":"XRP_USDT","data":{}}"#,
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn trade_frames_parse_sides() {
        let ws = client();
        let mut rx = ws.subscribe_trades("BTC_USDT", "BTC/USDT");

        ws.handle_frame(
            r#"{"channel":"trades","symbol":"BTC_USDT","ts":1700000000000,
               "data":{"price":"50000","size":"0.25","side":"SELL","tradeId":"t-9"}}"#,
        );

        let trade = rx.try_recv().unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.size, dec!(0.25));
        assert_eq!(trade.symbol, "BTC/USDT");
    }
}
