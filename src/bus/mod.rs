//! Typed in-process pub/sub.
//!
//! Each subscriber gets its own bounded FIFO channel. Publishing never
//! blocks: a full subscriber buffer drops the event for that subscriber and
//! increments the labelled drop counter. Ordering is FIFO per subscriber and
//! unspecified across subscribers. `close()` drops every sender, which
//! terminates all subscriber streams.
//!
//! Risk checkpoints deliberately do not travel here; they use the
//! never-dropped persistence channel.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::{
    ExecutionReport, FundingRate, OrderBookSnapshot, OrderStateChange, Trade, TradeSignal,
};
use crate::monitor::Metrics;

struct Subscriber<T> {
    name: String,
    tx: mpsc::Sender<T>,
}

/// One event kind's fan-out list.
struct Topic<T> {
    kind: &'static str,
    subscribers: RwLock<Vec<Subscriber<T>>>,
}

impl<T: Clone> Topic<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self, name: &str, buffer: usize) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers.write().push(Subscriber {
            name: name.to_string(),
            tx,
        });
        rx
    }

    fn publish(&self, event: &T, metrics: &Metrics) {
        let subscribers = self.subscribers.read();
        for sub in subscribers.iter() {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics
                        .bus_dropped_events
                        .with_label_values(&[self.kind, &sub.name])
                        .inc();
                    warn!(
                        event = self.kind,
                        subscriber = %sub.name,
                        "subscriber buffer full, dropping event"
                    );
                }
                // A closed receiver is a departed subscriber; cleaned up on close.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    fn close(&self) {
        self.subscribers.write().clear();
    }
}

pub struct EventBus {
    buffer_size: usize,
    metrics: Arc<Metrics>,
    order_books: Topic<OrderBookSnapshot>,
    trades: Topic<Trade>,
    funding_rates: Topic<FundingRate>,
    signals: Topic<TradeSignal>,
    order_states: Topic<OrderStateChange>,
    exec_reports: Topic<ExecutionReport>,
}

impl EventBus {
    pub fn new(buffer_size: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            buffer_size,
            metrics,
            order_books: Topic::new("order_book"),
            trades: Topic::new("trade"),
            funding_rates: Topic::new("funding_rate"),
            signals: Topic::new("trade_signal"),
            order_states: Topic::new("order_state"),
            exec_reports: Topic::new("execution_report"),
        }
    }

    pub fn subscribe_order_books(&self, who: &str) -> mpsc::Receiver<OrderBookSnapshot> {
        self.order_books.subscribe(who, self.buffer_size)
    }

    pub fn publish_order_book(&self, snap: &OrderBookSnapshot) {
        self.order_books.publish(snap, &self.metrics);
    }

    pub fn subscribe_trades(&self, who: &str) -> mpsc::Receiver<Trade> {
        self.trades.subscribe(who, self.buffer_size)
    }

    pub fn publish_trade(&self, trade: &Trade) {
        self.trades.publish(trade, &self.metrics);
    }

    pub fn subscribe_funding_rates(&self, who: &str) -> mpsc::Receiver<FundingRate> {
        self.funding_rates.subscribe(who, self.buffer_size)
    }

    pub fn publish_funding_rate(&self, rate: &FundingRate) {
        self.funding_rates.publish(rate, &self.metrics);
    }

    pub fn subscribe_signals(&self, who: &str) -> mpsc::Receiver<TradeSignal> {
        self.signals.subscribe(who, self.buffer_size)
    }

    pub fn publish_signal(&self, signal: &TradeSignal) {
        self.signals.publish(signal, &self.metrics);
    }

    pub fn subscribe_order_states(&self, who: &str) -> mpsc::Receiver<OrderStateChange> {
        self.order_states.subscribe(who, self.buffer_size)
    }

    pub fn publish_order_state(&self, change: &OrderStateChange) {
        self.order_states.publish(change, &self.metrics);
    }

    pub fn subscribe_execution_reports(&self, who: &str) -> mpsc::Receiver<ExecutionReport> {
        self.exec_reports.subscribe(who, self.buffer_size)
    }

    pub fn publish_execution_report(&self, report: &ExecutionReport) {
        self.exec_reports.publish(report, &self.metrics);
    }

    /// Drop all subscriber channels; every stream ends.
    pub fn close(&self) {
        self.order_books.close();
        self.trades.close();
        self.funding_rates.close();
        self.signals.close();
        self.order_states.close();
        self.exec_reports.close();
    }
}
