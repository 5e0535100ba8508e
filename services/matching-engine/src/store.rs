//! Durable store contract
//!
//! The engine upserts an order row on every status transition and inserts a
//! trade row per trade; writes are at-least-once and idempotent on
//! `(order_id, updated_time)`. The process-wide store is injected at engine
//! construction; tests and the standalone binary use the in-memory
//! implementation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use types::ids::{OrderId, TradeId};
use types::order::{Order, OrderStatus};
use types::trade::Trade;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Order rows: upsert keyed by `order_id`.
pub trait OrderStore: Send + Sync {
    fn upsert_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Open orders for warm-starting books on process start.
    fn open_orders(&self) -> Result<Vec<Order>, StoreError>;
}

/// Trade rows: insert-only.
pub trait TradeStore: Send + Sync {
    fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError>;
}

/// In-memory store used by tests and the standalone binary.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    trades: RwLock<Vec<Trade>>,
    /// Test hook: fail this many upcoming writes
    failures_remaining: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail, to exercise retry paths.
    pub fn fail_next_writes(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.read().get(&order_id).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.orders.read().len()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.read().clone()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.read().len()
    }
}

impl OrderStore for InMemoryStore {
    fn upsert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.maybe_fail()?;
        self.orders.write().insert(order.order_id, order.clone());
        Ok(())
    }

    fn open_orders(&self) -> Result<Vec<Order>, StoreError> {
        let mut open: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| o.status.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|o| o.order_id);
        Ok(open)
    }
}

impl TradeStore for InMemoryStore {
    fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.maybe_fail()?;
        let mut trades = self.trades.write();
        // Insert-only: a redelivered trade id is a no-op
        if !trades.iter().any(|t| t.trade_id == trade.trade_id) {
            trades.push(trade.clone());
        }
        Ok(())
    }
}

/// Convenience for asserting terminal rows in tests.
impl InMemoryStore {
    pub fn orders_with_status(&self, status: OrderStatus) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect()
    }

    pub fn trade(&self, trade_id: TradeId) -> Option<Trade> {
        self.trades.read().iter().find(|t| t.trade_id == trade_id).cloned()
    }
}
