//! Order registry
//!
//! Canonical `order_id → order` store. Owns lifecycle transitions and the
//! executed-quantity/average-price accounting, the per-user open-order
//! index, OCO sibling links, and each order's admission cost lock. Mutated
//! only by the matcher worker of the order's symbol (and by admission);
//! read freely through the engine facade.

use std::collections::{BTreeSet, HashMap};
use types::errors::EngineError;
use types::ids::{OrderId, Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderStatus};

use crate::risk::CostLock;

/// A stored order plus its admission lock.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order: Order,
    pub lock: Option<CostLock>,
}

/// Result of a cancel request against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Transitioned to PENDING_CANCEL; the matcher will apply it
    Requested,
    /// Already PENDING_CANCEL; request is idempotent
    AlreadyPending,
}

#[derive(Debug, Default)]
pub struct OrderRegistry {
    orders: HashMap<OrderId, OrderRecord>,
    open_by_user: HashMap<UserId, BTreeSet<OrderId>>,
    oco_links: HashMap<OrderId, OrderId>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: Order, lock: Option<CostLock>) {
        if order.status.is_open() {
            self.open_by_user
                .entry(order.user_id)
                .or_default()
                .insert(order.order_id);
        }
        self.orders.insert(order.order_id, OrderRecord { order, lock });
    }

    /// Remove a row entirely (admission rollback on backpressure).
    pub fn remove(&mut self, order_id: OrderId) -> Option<OrderRecord> {
        let record = self.orders.remove(&order_id)?;
        if let Some(open) = self.open_by_user.get_mut(&record.order.user_id) {
            open.remove(&order_id);
        }
        Some(record)
    }

    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).map(|r| r.order.clone())
    }

    pub fn status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.orders.get(&order_id).map(|r| r.order.status)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.orders.contains_key(&order_id)
    }

    pub fn open_count(&self, user_id: &UserId) -> usize {
        self.open_by_user.get(user_id).map_or(0, |s| s.len())
    }

    /// Open orders for a user, oldest first, optionally filtered by symbol.
    pub fn list_open(&self, user_id: &UserId, symbol: Option<&Symbol>) -> Vec<Order> {
        let Some(ids) = self.open_by_user.get(user_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.orders.get(id))
            .map(|r| &r.order)
            .filter(|o| symbol.map_or(true, |s| &o.symbol == s))
            .cloned()
            .collect()
    }

    /// All open orders across users (expiry sweeps, warm starts).
    pub fn all_open(&self) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .values()
            .filter(|r| r.order.status.is_open())
            .map(|r| r.order.clone())
            .collect();
        open.sort_by_key(|o| o.order_id);
        open
    }

    /// Link two orders as OCO siblings, both directions.
    pub fn link_oco(&mut self, a: OrderId, b: OrderId) {
        self.oco_links.insert(a, b);
        self.oco_links.insert(b, a);
    }

    pub fn oco_sibling(&self, order_id: OrderId) -> Option<OrderId> {
        self.oco_links.get(&order_id).copied()
    }

    /// Record a fill against an order; average price always derives from
    /// the cumulative totals kept on the order.
    pub fn apply_fill(
        &mut self,
        order_id: OrderId,
        qty: Quantity,
        price: Price,
        timestamp: i64,
    ) -> Result<Order, EngineError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::NotFound(order_id))?;
        if record.order.status.is_terminal() {
            return Err(EngineError::Internal(format!(
                "fill against terminal order {order_id}"
            )));
        }
        record.order.record_fill(qty, price, timestamp);
        let order = record.order.clone();
        if !order.status.is_open() {
            if let Some(open) = self.open_by_user.get_mut(&order.user_id) {
                open.remove(&order_id);
            }
        }
        Ok(order)
    }

    /// Transition an order's status, maintaining the open index.
    pub fn transition(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
        timestamp: i64,
    ) -> Result<Order, EngineError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::NotFound(order_id))?;
        if record.order.status.is_terminal() {
            return Err(EngineError::NotCancellable {
                order_id,
                status: record.order.status,
            });
        }
        record.order.transition(status, timestamp);
        let order = record.order.clone();
        if !order.status.is_open() {
            if let Some(open) = self.open_by_user.get_mut(&order.user_id) {
                open.remove(&order_id);
            }
        }
        Ok(order)
    }

    /// Replace a row with a matcher-mutated copy, reconciling the index.
    pub fn sync(&mut self, order: Order) {
        let open = order.status.is_open();
        let user_id = order.user_id;
        let order_id = order.order_id;
        if let Some(record) = self.orders.get_mut(&order_id) {
            record.order = order;
        } else {
            self.orders.insert(order_id, OrderRecord { order, lock: None });
        }
        let entry = self.open_by_user.entry(user_id).or_default();
        if open {
            entry.insert(order_id);
        } else {
            entry.remove(&order_id);
        }
    }

    /// Request a cancel. Idempotent on PENDING_CANCEL, an error on
    /// terminal or unknown orders.
    pub fn begin_cancel(&mut self, order_id: OrderId, timestamp: i64) -> Result<CancelOutcome, EngineError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::NotFound(order_id))?;
        match record.order.status {
            status if status.is_terminal() => Err(EngineError::NotCancellable { order_id, status }),
            OrderStatus::PendingCancel => Ok(CancelOutcome::AlreadyPending),
            _ => {
                record.order.transition(OrderStatus::PendingCancel, timestamp);
                Ok(CancelOutcome::Requested)
            }
        }
    }

    pub fn take_lock(&mut self, order_id: OrderId) -> Option<CostLock> {
        self.orders.get_mut(&order_id)?.lock.take()
    }

    pub fn put_lock(&mut self, order_id: OrderId, lock: CostLock) {
        if let Some(record) = self.orders.get_mut(&order_id) {
            record.lock = Some(lock);
        }
    }

    pub fn lock_mut(&mut self, order_id: OrderId) -> Option<&mut CostLock> {
        self.orders.get_mut(&order_id)?.lock.as_mut()
    }
}
