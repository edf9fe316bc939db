//! Order records and gateway acknowledgement types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{InstrumentKind, OrderStatus, OrderType, Side};

/// The authoritative order record, owned by the order manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub internal_id: Uuid,
    /// Venue-assigned id, known after acknowledgement.
    pub venue_id: Option<String>,
    pub signal_id: Uuid,
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub avg_fill_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What the execution engine asks the order manager to place.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub internal_id: Uuid,
    pub signal_id: Uuid,
    pub venue: String,
    pub symbol: String,
    pub side: Side,
    pub instrument: InstrumentKind,
    pub order_type: OrderType,
    pub price: Decimal,
    pub size: Decimal,
    /// Derived from `{signal_id}-leg-{i}`; duplicate submissions with the
    /// same key return the existing order without touching the venue.
    pub idempotency_key: String,
}

/// Venue acknowledgement of a placed order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub internal_id: Uuid,
    pub venue_id: String,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub avg_fill_price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Venue acknowledgement of a cancel.
#[derive(Debug, Clone)]
pub struct CancelAck {
    pub venue_id: String,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

/// Published on every order status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStateChange {
    pub order: Order,
    pub prev_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}
