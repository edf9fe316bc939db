//! Market-data service: authoritative book state, trade history, funding
//! series, and freshness tracking.
//!
//! This service exclusively owns book and freshness state. Readers get
//! copies; updates arrive only through the gateway reader tasks. Every
//! accepted update is re-published on the event bus.

mod ring;

pub use ring::TradeRingBuffer;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::domain::{FundingRate, OrderBookDelta, OrderBookSnapshot, PriceLevel, Trade};

/// Per-symbol trade history capacity.
const TRADE_BUFFER_CAPACITY: usize = 1000;

/// Heartbeat cadence for the staleness monitor.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Identifies one (venue, symbol) feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub venue: String,
    pub symbol: String,
}

impl FeedKey {
    pub fn new(venue: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            symbol: symbol.into(),
        }
    }
}

impl std::fmt::Display for FeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.venue, self.symbol)
    }
}

/// Outcome of a delta application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied,
    /// Venue sequence jumped; the feed is blocked until a fresh snapshot
    /// arrives. The caller must request one.
    GapDetected,
}

struct BookState {
    book: OrderBookSnapshot,
    last_update: Instant,
    gapped: bool,
}

pub struct MarketDataService {
    books: RwLock<HashMap<FeedKey, BookState>>,
    trade_buffers: RwLock<HashMap<FeedKey, Arc<TradeRingBuffer>>>,
    funding: RwLock<HashMap<FeedKey, VecDeque<FundingRate>>>,
    bus: Arc<EventBus>,
    warn_after: Duration,
    block_after: Duration,
    funding_capacity: usize,
}

impl MarketDataService {
    pub fn new(
        bus: Arc<EventBus>,
        warn_after: Duration,
        block_after: Duration,
        funding_lookback: usize,
    ) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            trade_buffers: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
            bus,
            warn_after,
            block_after,
            funding_capacity: funding_lookback * 2,
        }
    }

    /// Full book replacement. Clears any outstanding sequence gap.
    pub fn update_snapshot(&self, mut snap: OrderBookSnapshot) {
        snap.local_time = Some(chrono::Utc::now());
        let key = FeedKey::new(&snap.venue, &snap.symbol);

        if snap.is_crossed() {
            warn!(feed = %key, "crossed book in snapshot, treating as freshness anomaly");
        }

        {
            let mut books = self.books.write();
            books.insert(
                key,
                BookState {
                    book: snap.clone(),
                    last_update: Instant::now(),
                    gapped: false,
                },
            );
        }

        self.bus.publish_order_book(&snap);
    }

    /// Merge incremental level updates into the live book.
    ///
    /// A gap in the venue sequence marks the feed blocked and drops the
    /// delta; the gateway must re-request a snapshot.
    pub fn apply_delta(&self, delta: OrderBookDelta) -> DeltaOutcome {
        let key = FeedKey::new(&delta.venue, &delta.symbol);
        let snap = {
            let mut books = self.books.write();
            let state = books.entry(key.clone()).or_insert_with(|| BookState {
                book: OrderBookSnapshot {
                    venue: delta.venue.clone(),
                    symbol: delta.symbol.clone(),
                    ..Default::default()
                },
                last_update: Instant::now(),
                gapped: false,
            });

            if state.book.sequence != 0 && delta.sequence > state.book.sequence + 1 {
                warn!(
                    feed = %key,
                    have = state.book.sequence,
                    got = delta.sequence,
                    "sequence gap, feed blocked pending resync"
                );
                state.gapped = true;
                return DeltaOutcome::GapDetected;
            }

            apply_level_deltas(&mut state.book.bids, &delta.bids, true);
            apply_level_deltas(&mut state.book.asks, &delta.asks, false);
            state.book.sequence = delta.sequence;
            state.book.venue_time = delta.venue_time;
            state.book.local_time = Some(chrono::Utc::now());
            state.last_update = Instant::now();

            if state.book.is_crossed() {
                warn!(feed = %key, "crossed book after delta, treating as freshness anomaly");
            }

            state.book.clone()
        };

        self.bus.publish_order_book(&snap);
        DeltaOutcome::Applied
    }

    pub fn record_trade(&self, trade: Trade) {
        let key = FeedKey::new(&trade.venue, &trade.symbol);
        let buffer = {
            let mut buffers = self.trade_buffers.write();
            buffers
                .entry(key)
                .or_insert_with(|| Arc::new(TradeRingBuffer::new(TRADE_BUFFER_CAPACITY)))
                .clone()
        };
        buffer.push(trade.clone());
        self.bus.publish_trade(&trade);
    }

    pub fn update_funding_rate(&self, rate: FundingRate) {
        let key = FeedKey::new(&rate.venue, &rate.symbol);
        {
            let mut funding = self.funding.write();
            let series = funding.entry(key).or_default();
            series.push_back(rate.clone());
            while series.len() > self.funding_capacity {
                series.pop_front();
            }
        }
        self.bus.publish_funding_rate(&rate);
    }

    /// A copy of the current book, if the feed exists.
    pub fn order_book(&self, venue: &str, symbol: &str) -> Option<OrderBookSnapshot> {
        let books = self.books.read();
        books
            .get(&FeedKey::new(venue, symbol))
            .map(|s| s.book.clone())
    }

    pub fn mid_price(&self, venue: &str, symbol: &str) -> Option<Decimal> {
        let books = self.books.read();
        books
            .get(&FeedKey::new(venue, symbol))?
            .book
            .mid_price()
    }

    pub fn recent_trades(&self, venue: &str, symbol: &str, n: usize) -> Vec<Trade> {
        let buffers = self.trade_buffers.read();
        buffers
            .get(&FeedKey::new(venue, symbol))
            .map(|b| b.recent(n))
            .unwrap_or_default()
    }

    pub fn funding_history(&self, venue: &str, symbol: &str) -> Vec<FundingRate> {
        let funding = self.funding.read();
        funding
            .get(&FeedKey::new(venue, symbol))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Age below the warning threshold.
    pub fn is_fresh(&self, venue: &str, symbol: &str) -> bool {
        let books = self.books.read();
        match books.get(&FeedKey::new(venue, symbol)) {
            Some(state) => state.last_update.elapsed() < self.warn_after,
            None => false,
        }
    }

    /// Missing, gapped, or older than the block threshold. Blocked feeds
    /// reject any signal touching them.
    pub fn is_blocked(&self, venue: &str, symbol: &str) -> bool {
        let books = self.books.read();
        match books.get(&FeedKey::new(venue, symbol)) {
            Some(state) => state.gapped || state.last_update.elapsed() >= self.block_after,
            None => true,
        }
    }

    pub fn data_age(&self, venue: &str, symbol: &str) -> Option<Duration> {
        let books = self.books.read();
        books
            .get(&FeedKey::new(venue, symbol))
            .map(|s| s.last_update.elapsed())
    }

    /// Log any feed whose age exceeds the warn or block threshold, every
    /// 500 ms, until shutdown.
    pub async fn run_heartbeat(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        info!("market-data heartbeat monitor started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("market-data heartbeat monitor stopped");
                        return;
                    }
                }
                _ = ticker.tick() => self.check_staleness(),
            }
        }
    }

    fn check_staleness(&self) {
        let books = self.books.read();
        for (key, state) in books.iter() {
            let age = state.last_update.elapsed();
            if state.gapped || age >= self.block_after {
                warn!(feed = %key, age_ms = age.as_millis() as u64, gapped = state.gapped,
                    "market data blocked: exceeds block threshold");
            } else if age >= self.warn_after {
                warn!(feed = %key, age_ms = age.as_millis() as u64,
                    "market data stale: exceeds warning threshold");
            }
        }
    }
}

/// Merge deltas into a level list, keeping it sorted (descending for bids,
/// ascending for asks) with no duplicate prices and no zero-size levels.
fn apply_level_deltas(levels: &mut Vec<PriceLevel>, deltas: &[PriceLevel], descending: bool) {
    for delta in deltas {
        match levels.iter().position(|l| l.price == delta.price) {
            Some(i) => {
                if delta.size.is_zero() {
                    levels.remove(i);
                } else {
                    levels[i].size = delta.size;
                }
            }
            None => {
                if !delta.size.is_zero() {
                    levels.push(*delta);
                }
            }
        }
    }

    if descending {
        levels.sort_by(|a, b| b.price.cmp(&a.price));
    } else {
        levels.sort_by(|a, b| a.price.cmp(&b.price));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Metrics;
    use rust_decimal_macros::dec;

    fn service() -> MarketDataService {
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(EventBus::new(64, metrics));
        MarketDataService::new(bus, Duration::from_millis(500), Duration::from_secs(2), 12)
    }

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    fn delta(sequence: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> OrderBookDelta {
        OrderBookDelta {
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            bids,
            asks,
            sequence,
            venue_time: None,
            snapshot: false,
        }
    }

    #[test]
    fn delta_inserts_updates_and_removes() {
        let md = service();
        md.apply_delta(delta(
            1,
            vec![level(dec!(100), dec!(1)), level(dec!(99), dec!(2))],
            vec![level(dec!(101), dec!(1))],
        ));
        // Update 100, remove 99, insert 98.
        md.apply_delta(delta(
            2,
            vec![
                level(dec!(100), dec!(5)),
                level(dec!(99), dec!(0)),
                level(dec!(98), dec!(3)),
            ],
            vec![],
        ));

        let book = md.order_book("kcex", "BTC/USDT").unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.bids[0], level(dec!(100), dec!(5)));
        assert_eq!(book.bids[1], level(dec!(98), dec!(3)));
    }

    #[test]
    fn bids_descend_asks_ascend() {
        let md = service();
        md.apply_delta(delta(
            1,
            vec![level(dec!(99), dec!(1)), level(dec!(100), dec!(1))],
            vec![level(dec!(102), dec!(1)), level(dec!(101), dec!(1))],
        ));

        let book = md.order_book("kcex", "BTC/USDT").unwrap();
        assert!(book.bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(book.asks.windows(2).all(|w| w[0].price < w[1].price));
        assert!(book.bids.iter().all(|l| !l.size.is_zero()));
    }

    #[test]
    fn sequence_gap_blocks_until_snapshot() {
        let md = service();
        md.apply_delta(delta(1, vec![level(dec!(100), dec!(1))], vec![]));
        assert!(!md.is_blocked("kcex", "BTC/USDT"));

        let outcome = md.apply_delta(delta(5, vec![level(dec!(100), dec!(2))], vec![]));
        assert_eq!(outcome, DeltaOutcome::GapDetected);
        assert!(md.is_blocked("kcex", "BTC/USDT"));

        // The gapped delta was not applied.
        let book = md.order_book("kcex", "BTC/USDT").unwrap();
        assert_eq!(book.bids[0].size, dec!(1));

        md.update_snapshot(OrderBookSnapshot {
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            bids: vec![level(dec!(100), dec!(2))],
            asks: vec![level(dec!(101), dec!(1))],
            sequence: 6,
            ..Default::default()
        });
        assert!(!md.is_blocked("kcex", "BTC/USDT"));
    }

    #[test]
    fn missing_feed_is_blocked_not_fresh() {
        let md = service();
        assert!(md.is_blocked("kcex", "ETH/USDT"));
        assert!(!md.is_fresh("kcex", "ETH/USDT"));
        assert!(md.data_age("kcex", "ETH/USDT").is_none());
    }

    #[test]
    fn funding_series_is_bounded() {
        let md = service();
        for i in 0..50 {
            md.update_funding_rate(FundingRate {
                venue: "kcex".into(),
                symbol: "BTCUSDT".into(),
                rate: Decimal::new(i, 4),
                timestamp: chrono::Utc::now(),
                next_time: None,
            });
        }
        // Capacity is 2x lookback (12).
        assert_eq!(md.funding_history("kcex", "BTCUSDT").len(), 24);
    }

    #[test]
    fn mid_price_from_copy() {
        let md = service();
        md.update_snapshot(OrderBookSnapshot {
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            bids: vec![level(dec!(49990), dec!(1))],
            asks: vec![level(dec!(50010), dec!(1))],
            sequence: 1,
            ..Default::default()
        });
        assert_eq!(md.mid_price("kcex", "BTC/USDT"), Some(dec!(50000)));
    }
}
