//! Bounded trade history per feed.

use parking_lot::Mutex;

use crate::domain::Trade;

/// Fixed-capacity ring that overwrites the oldest entry when full.
pub struct TradeRingBuffer {
    inner: Mutex<Ring>,
}

struct Ring {
    slots: Vec<Option<Trade>>,
    /// Total pushes since creation; `head % capacity` is the next write slot.
    head: u64,
}

impl TradeRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                slots: vec![None; capacity],
                head: 0,
            }),
        }
    }

    pub fn push(&self, trade: Trade) {
        let mut ring = self.inner.lock();
        let cap = ring.slots.len() as u64;
        let idx = (ring.head % cap) as usize;
        ring.slots[idx] = Some(trade);
        ring.head += 1;
    }

    /// Up to `n` most recent trades, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Trade> {
        let ring = self.inner.lock();
        let cap = ring.slots.len() as u64;
        let available = ring.head.min(cap);
        let take = (n as u64).min(available);

        let mut out = Vec::with_capacity(take as usize);
        for i in (ring.head - take)..ring.head {
            if let Some(trade) = &ring.slots[(i % cap) as usize] {
                out.push(trade.clone());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        let ring = self.inner.lock();
        ring.head.min(ring.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().head == 0
    }
}
