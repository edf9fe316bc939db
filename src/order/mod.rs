//! Order lifecycle management.
//!
//! The manager owns the authoritative order table. Statuses move through a
//! strict DAG and never leave a terminal state:
//!
//! ```text
//! PendingNew → Submitted → Acknowledged → PartialFill → Filled
//!                                               ↘ Cancelled
//!                                               ↘ Rejected
//!                        ↘ SubmitFailed
//! ```
//!
//! Every transition publishes an [`OrderStateChange`]. Submission is
//! idempotent: a request whose idempotency key already maps to an order
//! returns that order without touching the venue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::domain::{Order, OrderRequest, OrderStateChange, OrderStatus};
use crate::error::{Error, Result};
use crate::exchange::GatewayMap;
use crate::monitor::Metrics;

/// Sweep cadence for terminal-order garbage collection.
const GC_INTERVAL: Duration = Duration::from_secs(60);

pub struct OrderManager {
    orders: RwLock<HashMap<Uuid, Order>>,
    venue_ids: RwLock<HashMap<String, Uuid>>,
    /// Append-only for orders that reached the venue; a SubmitFailed slot
    /// may be replaced by a retry under the same key.
    idempotency: RwLock<HashMap<String, Uuid>>,
    gateways: GatewayMap,
    bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
}

impl OrderManager {
    pub fn new(gateways: GatewayMap, bus: Arc<EventBus>, metrics: Arc<Metrics>) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            venue_ids: RwLock::new(HashMap::new()),
            idempotency: RwLock::new(HashMap::new()),
            gateways,
            bus,
            metrics,
        }
    }

    /// Place an order through the venue gateway.
    ///
    /// Duplicate idempotency keys short-circuit to the existing order. An
    /// unknown venue fails the order without a venue round trip.
    pub async fn submit(&self, req: OrderRequest) -> Result<Order> {
        if !req.idempotency_key.is_empty() {
            let idempotency = self.idempotency.read();
            if let Some(existing_id) = idempotency.get(&req.idempotency_key) {
                let orders = self.orders.read();
                if let Some(existing) = orders.get(existing_id) {
                    // SubmitFailed attempts never reached the venue; a retry
                    // under the same key replaces them. Anything else is a
                    // duplicate submission and short-circuits.
                    if existing.status != OrderStatus::SubmitFailed {
                        debug!(
                            key = %req.idempotency_key,
                            order_id = %existing_id,
                            "duplicate submission, returning existing order"
                        );
                        return Ok(existing.clone());
                    }
                }
            }
        }

        let order = Order {
            internal_id: req.internal_id,
            venue_id: None,
            signal_id: req.signal_id,
            venue: req.venue.clone(),
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: req.order_type,
            price: req.price,
            size: req.size,
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: OrderStatus::PendingNew,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        {
            let mut orders = self.orders.write();
            orders.insert(order.internal_id, order.clone());
            if !req.idempotency_key.is_empty() {
                self.idempotency
                    .write()
                    .insert(req.idempotency_key.clone(), order.internal_id);
            }
        }
        self.publish_change(&order, None, OrderStatus::PendingNew);

        let Some(gateway) = self.gateways.get(&req.venue) else {
            self.transition(req.internal_id, OrderStatus::SubmitFailed);
            self.metrics
                .order_submit_failures
                .with_label_values(&[&req.venue])
                .inc();
            return Err(Error::UnknownVenue(req.venue));
        };

        self.transition(req.internal_id, OrderStatus::Submitted);

        match gateway.place_order(&req).await {
            Ok(ack) => {
                let updated = {
                    let mut orders = self.orders.write();
                    let order = orders
                        .get_mut(&req.internal_id)
                        .ok_or(Error::OrderNotFound(req.internal_id))?;
                    let prev = order.status;
                    order.venue_id = Some(ack.venue_id.clone());
                    order.status = ack.status;
                    order.filled_size = ack.filled_size;
                    order.avg_fill_price = ack.avg_fill_price;
                    order.updated_at = Utc::now();
                    if !ack.venue_id.is_empty() {
                        self.venue_ids.write().insert(ack.venue_id, req.internal_id);
                    }
                    (order.clone(), prev)
                };
                self.publish_change(&updated.0, Some(updated.1), updated.0.status);
                self.metrics
                    .orders_submitted
                    .with_label_values(&[&updated.0.venue, &updated.0.symbol])
                    .inc();
                Ok(updated.0)
            }
            Err(e) => {
                self.transition(req.internal_id, OrderStatus::SubmitFailed);
                self.metrics
                    .order_submit_failures
                    .with_label_values(&[&req.venue])
                    .inc();
                Err(e)
            }
        }
    }

    /// Cancel by internal id. A terminal order is a no-op.
    pub async fn cancel(&self, internal_id: Uuid) -> Result<()> {
        let (venue, venue_id, terminal) = {
            let orders = self.orders.read();
            let order = orders
                .get(&internal_id)
                .ok_or(Error::OrderNotFound(internal_id))?;
            (
                order.venue.clone(),
                order.venue_id.clone(),
                order.is_terminal(),
            )
        };

        if terminal {
            debug!(order_id = %internal_id, "cancel of terminal order is a no-op");
            return Ok(());
        }

        let gateway = self
            .gateways
            .get(&venue)
            .ok_or_else(|| Error::UnknownVenue(venue.clone()))?;

        if let Some(venue_id) = venue_id {
            gateway.cancel_order(&venue_id).await?;
        }

        self.transition(internal_id, OrderStatus::Cancelled);
        self.metrics.order_cancels.with_label_values(&[&venue]).inc();
        Ok(())
    }

    /// Cancel every non-terminal order. Used by the kill-switch handler and
    /// at shutdown.
    pub async fn cancel_all(&self) {
        let active: Vec<Uuid> = {
            let orders = self.orders.read();
            orders
                .values()
                .filter(|o| !o.is_terminal())
                .map(|o| o.internal_id)
                .collect()
        };

        info!(count = active.len(), "cancelling all open orders");
        for id in active {
            if let Err(e) = self.cancel(id).await {
                error!(order_id = %id, error = %e, "failed to cancel order");
            }
        }
    }

    /// Apply a fill: PartialFill below the requested size, Filled at or
    /// above it.
    pub fn update_fill(&self, internal_id: Uuid, filled_size: Decimal, avg_price: Decimal) {
        let change = {
            let mut orders = self.orders.write();
            let Some(order) = orders.get_mut(&internal_id) else {
                warn!(order_id = %internal_id, "fill update for unknown order");
                return;
            };
            if order.is_terminal() {
                warn!(order_id = %internal_id, status = %order.status,
                    "ignoring fill update for terminal order");
                return;
            }

            let prev = order.status;
            order.filled_size = filled_size;
            order.avg_fill_price = avg_price;
            order.updated_at = Utc::now();
            order.status = if filled_size >= order.size {
                OrderStatus::Filled
            } else if filled_size > Decimal::ZERO {
                OrderStatus::PartialFill
            } else {
                prev
            };

            (prev != order.status).then(|| (order.clone(), prev, order.status))
        };

        if let Some((order, prev, new)) = change {
            self.publish_change(&order, Some(prev), new);
        }
    }

    pub fn order(&self, internal_id: Uuid) -> Option<Order> {
        self.orders.read().get(&internal_id).cloned()
    }

    pub fn order_by_venue_id(&self, venue_id: &str) -> Option<Order> {
        let internal_id = *self.venue_ids.read().get(venue_id)?;
        self.order(internal_id)
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect()
    }

    pub fn orders_by_signal(&self, signal_id: Uuid) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.signal_id == signal_id)
            .cloned()
            .collect()
    }

    /// Drop terminal orders older than `max_age`. The idempotency map is
    /// append-only and intentionally untouched.
    pub fn gc_terminal(&self, max_age: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::seconds(3600));
        let mut orders = self.orders.write();
        let mut venue_ids = self.venue_ids.write();
        orders.retain(|_, order| {
            let stale = order.is_terminal() && order.updated_at < cutoff;
            if stale {
                if let Some(venue_id) = &order.venue_id {
                    venue_ids.remove(venue_id);
                }
            }
            !stale
        });
    }

    /// Periodic GC task.
    pub async fn run_gc(self: Arc<Self>, max_age: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(GC_INTERVAL);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => self.gc_terminal(max_age),
            }
        }
    }

    /// Set status if the order is not already terminal, and publish.
    fn transition(&self, internal_id: Uuid, new_status: OrderStatus) {
        let change = {
            let mut orders = self.orders.write();
            let Some(order) = orders.get_mut(&internal_id) else {
                return;
            };
            if order.is_terminal() {
                warn!(
                    order_id = %internal_id,
                    status = %order.status,
                    attempted = %new_status,
                    "refusing transition out of terminal state"
                );
                self.metrics.invariant_violations.inc();
                return;
            }
            let prev = order.status;
            order.status = new_status;
            order.updated_at = Utc::now();
            (order.clone(), prev)
        };
        self.publish_change(&change.0, Some(change.1), new_status);
    }

    fn publish_change(&self, order: &Order, prev: Option<OrderStatus>, new: OrderStatus) {
        self.bus.publish_order_state(&OrderStateChange {
            order: order.clone(),
            prev_status: prev,
            new_status: new,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Balance, CancelAck, FeeTier, FundingRate, InstrumentKind, OrderAck, OrderBookDelta,
        OrderType, Position, Side, Trade,
    };
    use crate::exchange::VenueGateway;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    /// Acknowledges everything; enough to exercise the manager's lifecycle.
    struct AckGateway;

    #[async_trait]
    impl VenueGateway for AckGateway {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "ack"
        }
        async fn subscribe_order_book(&self, _: &str) -> Result<mpsc::Receiver<OrderBookDelta>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn subscribe_trades(&self, _: &str) -> Result<mpsc::Receiver<Trade>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn subscribe_funding(&self, _: &str) -> Result<mpsc::Receiver<FundingRate>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck> {
            Ok(OrderAck {
                internal_id: req.internal_id,
                venue_id: format!("ack-{}", req.internal_id),
                status: OrderStatus::Acknowledged,
                filled_size: Decimal::ZERO,
                avg_fill_price: Decimal::ZERO,
                fee: Decimal::ZERO,
                timestamp: Utc::now(),
            })
        }
        async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelAck> {
            Ok(CancelAck {
                venue_id: venue_order_id.to_string(),
                status: OrderStatus::Cancelled,
                timestamp: Utc::now(),
            })
        }
        async fn open_orders(&self, _: Option<&str>) -> Result<Vec<Order>> {
            Ok(Vec::new())
        }
        async fn balances(&self) -> Result<HashMap<String, Balance>> {
            Ok(HashMap::new())
        }
        async fn positions(&self) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }
        async fn fee_tier(&self) -> Result<FeeTier> {
            Ok(FeeTier {
                venue: "ack".into(),
                maker_fee_bps: dec!(2),
                taker_fee_bps: dec!(5),
                updated_at: Utc::now(),
            })
        }
    }

    fn request(key: &str) -> OrderRequest {
        OrderRequest {
            internal_id: Uuid::now_v7(),
            signal_id: Uuid::now_v7(),
            venue: "nowhere".into(),
            symbol: "BTC/USDT".into(),
            side: Side::Buy,
            instrument: InstrumentKind::Spot,
            order_type: OrderType::Limit,
            price: dec!(50000),
            size: dec!(1),
            idempotency_key: key.into(),
        }
    }

    fn manager() -> OrderManager {
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(EventBus::new(64, metrics.clone()));
        OrderManager::new(HashMap::new(), bus, metrics)
    }

    fn manager_with_ack_venue(venue: &str) -> OrderManager {
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(EventBus::new(64, metrics.clone()));
        let mut gateways: GatewayMap = HashMap::new();
        gateways.insert(venue.to_string(), Arc::new(AckGateway));
        OrderManager::new(gateways, bus, metrics)
    }

    #[tokio::test]
    async fn unknown_venue_fails_submission() {
        let mgr = manager();
        let req = request("sig-leg-0");
        let id = req.internal_id;

        let result = mgr.submit(req).await;
        assert!(matches!(result, Err(Error::UnknownVenue(_))));

        let order = mgr.order(id).unwrap();
        assert_eq!(order.status, OrderStatus::SubmitFailed);
    }

    #[tokio::test]
    async fn idempotent_resubmission_returns_existing() {
        let mgr = manager_with_ack_venue("nowhere");
        let first = request("sig-leg-0");
        let first_id = first.internal_id;
        let placed = mgr.submit(first).await.unwrap();
        assert_eq!(placed.status, OrderStatus::Acknowledged);

        // Same key, different internal id: no new order is created.
        let result = mgr.submit(request("sig-leg-0")).await.unwrap();
        assert_eq!(result.internal_id, first_id);
    }

    #[tokio::test]
    async fn submit_failed_attempts_can_be_retried_under_same_key() {
        // Unknown venue: the attempt fails before reaching any gateway.
        let mgr = manager();
        let _ = mgr.submit(request("sig-leg-1")).await;

        // The same key does not pin the failed attempt forever.
        let retry = mgr.submit(request("sig-leg-1")).await;
        assert!(matches!(retry, Err(Error::UnknownVenue(_))));
        let failed: Vec<_> = mgr
            .orders
            .read()
            .values()
            .filter(|o| o.status == OrderStatus::SubmitFailed)
            .cloned()
            .collect();
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn terminal_orders_ignore_fill_updates() {
        let mgr = manager();
        let req = request("");
        let id = req.internal_id;
        let _ = mgr.submit(req).await; // SubmitFailed is terminal

        // Terminal orders ignore fills.
        mgr.update_fill(id, dec!(0.5), dec!(50000));
        assert_eq!(mgr.order(id).unwrap().filled_size, Decimal::ZERO);
    }

    #[test]
    fn fill_thresholds() {
        let mgr = manager();
        let order = Order {
            internal_id: Uuid::now_v7(),
            venue_id: None,
            signal_id: Uuid::now_v7(),
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: dec!(50000),
            size: dec!(1),
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            status: OrderStatus::Acknowledged,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = order.internal_id;
        mgr.orders.write().insert(id, order);

        mgr.update_fill(id, dec!(0.3), dec!(50000));
        assert_eq!(mgr.order(id).unwrap().status, OrderStatus::PartialFill);

        mgr.update_fill(id, dec!(1), dec!(50000));
        let order = mgr.order(id).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.filled_size <= order.size);
    }

    #[test]
    fn gc_drops_old_terminal_orders_only() {
        let mgr = manager();
        let mut terminal = Order {
            internal_id: Uuid::now_v7(),
            venue_id: Some("v-1".into()),
            signal_id: Uuid::now_v7(),
            venue: "kcex".into(),
            symbol: "BTC/USDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: dec!(50000),
            size: dec!(1),
            filled_size: dec!(1),
            avg_fill_price: dec!(50000),
            status: OrderStatus::Filled,
            created_at: Utc::now() - chrono::Duration::hours(2),
            updated_at: Utc::now() - chrono::Duration::hours(2),
        };
        let terminal_id = terminal.internal_id;
        mgr.venue_ids.write().insert("v-1".into(), terminal_id);
        mgr.orders.write().insert(terminal_id, terminal.clone());

        terminal.internal_id = Uuid::now_v7();
        terminal.venue_id = None;
        terminal.status = OrderStatus::Acknowledged;
        let active_id = terminal.internal_id;
        mgr.orders.write().insert(active_id, terminal);

        mgr.gc_terminal(Duration::from_secs(3600));
        assert!(mgr.order(terminal_id).is_none());
        assert!(mgr.order_by_venue_id("v-1").is_none());
        assert!(mgr.order(active_id).is_some());
    }
}
