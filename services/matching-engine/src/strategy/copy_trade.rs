//! Copy-trading strategy
//!
//! Mirrors a leader's fills, scaled by a copy ratio and capped per order.
//! Fill deltas are recovered from the leader's order updates (cumulative
//! executed quantity), queued, and submitted as market orders on the next
//! poll.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rust_decimal::Decimal;
use types::ids::{OrderId, Symbol, UserId};
use types::market::MarketSnapshot;
use types::numeric::Quantity;
use types::order::{NewOrder, Side};
use types::position::Position;

use crate::events::OrderUpdateEvent;
use crate::strategy::Strategy;

#[derive(Debug, Clone)]
pub struct CopyTradeConfig {
    pub leader: UserId,
    /// Fraction of the leader's fill quantity to mirror
    pub copy_ratio: Decimal,
    /// Cap on the quote notional of a single copied order
    pub max_notional: Decimal,
    pub poll_interval: Duration,
}

pub struct CopyTradeStrategy {
    symbol: Symbol,
    user: UserId,
    config: CopyTradeConfig,
    /// Cumulative executed quantity last seen per leader order
    seen: HashMap<OrderId, Quantity>,
    pending: VecDeque<(Side, Quantity)>,
    copies: u64,
}

impl CopyTradeStrategy {
    pub fn new(symbol: Symbol, user: UserId, config: CopyTradeConfig) -> Self {
        Self {
            symbol,
            user,
            config,
            seen: HashMap::new(),
            pending: VecDeque::new(),
            copies: 0,
        }
    }

    pub fn pending_copies(&self) -> usize {
        self.pending.len()
    }
}

impl Strategy for CopyTradeStrategy {
    fn name(&self) -> &str {
        "copy-trade"
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    fn generate_orders(&mut self, market: &MarketSnapshot, _positions: &[Position]) -> Vec<NewOrder> {
        let Some(reference) = market.reference_price() else {
            return Vec::new();
        };
        let cap = if reference.as_decimal() > Decimal::ZERO {
            self.config.max_notional / reference.as_decimal()
        } else {
            Decimal::ZERO
        };

        let mut orders = Vec::new();
        while let Some((side, qty)) = self.pending.pop_front() {
            let capped = qty.as_decimal().min(cap).round_dp(8);
            let Some(capped) = Quantity::try_new(capped).filter(|q| !q.is_zero()) else {
                continue;
            };
            self.copies += 1;
            let mut order = NewOrder::market(self.user, self.symbol.clone(), side, capped);
            order.client_order_id = format!("copy-{}", self.copies);
            orders.push(order);
        }
        orders
    }

    fn on_order_update(&mut self, update: &OrderUpdateEvent) {
        if update.user_id != self.config.leader || update.symbol != self.symbol {
            return;
        }
        let seen = self
            .seen
            .get(&update.order_id)
            .copied()
            .unwrap_or_else(Quantity::zero);
        if let Some(delta) = update.executed_qty.checked_sub(seen) {
            if !delta.is_zero() {
                let copy_qty = delta.as_decimal() * self.config.copy_ratio;
                if let Some(copy_qty) = Quantity::try_new(copy_qty).filter(|q| !q.is_zero()) {
                    self.pending.push_back((update.side, copy_qty));
                }
            }
        }
        if update.status.is_terminal() {
            self.seen.remove(&update.order_id);
        } else {
            self.seen.insert(update.order_id, update.executed_qty);
        }
    }
}
