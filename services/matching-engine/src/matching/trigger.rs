//! Conditional order triggers
//!
//! Stop, take-profit and trailing-stop orders are admitted `PENDING_NEW`,
//! held off-book here, and promoted once the reference price (last trade or
//! mark, per working type) crosses their trigger. Trailing triggers are
//! recomputed from the extreme price seen since activation. The matcher
//! re-evaluates after every trade it produces; promotion preserves
//! admission order.

use rust_decimal::Decimal;
use types::ids::OrderId;
use types::numeric::Price;
use types::order::{Order, OrderType, Side, WorkingType};

/// Trailing trigger state: the extreme reference price since activation and
/// the adjustment that derives the trigger from it.
#[derive(Debug, Clone)]
struct TrailingState {
    callback_rate: Option<Decimal>,
    trailing_delta: Option<Decimal>,
    extreme: Option<Price>,
}

impl TrailingState {
    /// Trigger price derived from the current extreme. A sell trails below
    /// the high; a buy trails above the low.
    fn trigger_price(&self, side: Side) -> Option<Price> {
        let extreme = self.extreme?.as_decimal();
        let offset = match (self.callback_rate, self.trailing_delta) {
            (Some(rate), _) => extreme * rate,
            (None, Some(delta)) => delta,
            (None, None) => return None,
        };
        let trigger = match side {
            Side::Sell => extreme - offset,
            Side::Buy => extreme + offset,
        };
        Price::try_new(trigger)
    }

    /// Advance the extreme in the favorable direction.
    fn observe(&mut self, side: Side, reference: Price) {
        self.extreme = Some(match (self.extreme, side) {
            (None, _) => reference,
            (Some(extreme), Side::Sell) if reference > extreme => reference,
            (Some(extreme), Side::Buy) if reference < extreme => reference,
            (Some(extreme), _) => extreme,
        });
    }
}

#[derive(Debug, Clone)]
struct PendingTrigger {
    order_id: OrderId,
    side: Side,
    order_type: OrderType,
    stop_price: Option<Price>,
    working_type: WorkingType,
    trailing: Option<TrailingState>,
}

impl PendingTrigger {
    fn current_trigger(&self) -> Option<Price> {
        match &self.trailing {
            Some(trailing) => trailing.trigger_price(self.side),
            None => self.stop_price,
        }
    }

    fn is_triggered(&self, reference: Price) -> bool {
        let Some(trigger) = self.current_trigger() else {
            return false;
        };
        match self.order_type {
            // Stops arm against adverse movement: a buy stop fires when the
            // price rises through it, a sell stop when it falls through
            OrderType::StopLoss | OrderType::StopLimit | OrderType::TrailingStop => match self.side {
                Side::Buy => reference >= trigger,
                Side::Sell => reference <= trigger,
            },
            // Take-profits fire on favorable movement, mirrored
            OrderType::TakeProfit | OrderType::TakeProfitLimit => match self.side {
                Side::Buy => reference <= trigger,
                Side::Sell => reference >= trigger,
            },
            _ => false,
        }
    }
}

/// Off-book store of pending conditional orders for one symbol.
#[derive(Debug, Default)]
pub struct TriggerBook {
    // Vec keeps admission order, which is also promotion order
    pending: Vec<PendingTrigger>,
}

impl TriggerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an admitted conditional order. `activation_reference` seeds the
    /// trailing extreme when a reference price exists at admission.
    pub fn insert(&mut self, order: &Order, activation_reference: Option<Price>) {
        let trailing = (order.order_type == OrderType::TrailingStop).then(|| TrailingState {
            callback_rate: order.callback_rate,
            trailing_delta: order.trailing_delta,
            extreme: activation_reference,
        });
        self.pending.push(PendingTrigger {
            order_id: order.order_id,
            side: order.side,
            order_type: order.order_type,
            stop_price: order.stop_price,
            working_type: order.working_type,
            trailing,
        });
    }

    pub fn remove(&mut self, order_id: OrderId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.order_id != order_id);
        before != self.pending.len()
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.pending.iter().any(|p| p.order_id == order_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Feed new reference prices; returns the ids of newly triggered orders
    /// in admission order, removing them from the pending set.
    pub fn on_price(&mut self, last: Option<Price>, mark: Option<Price>) -> Vec<OrderId> {
        let mut triggered = Vec::new();
        self.pending.retain_mut(|pending| {
            let reference = match pending.working_type {
                WorkingType::LastPrice => last,
                WorkingType::MarkPrice => mark.or(last),
            };
            let Some(reference) = reference else {
                return true;
            };
            if let Some(trailing) = pending.trailing.as_mut() {
                trailing.observe(pending.side, reference);
            }
            if pending.is_triggered(reference) {
                triggered.push(pending.order_id);
                false
            } else {
                true
            }
        });
        triggered
    }
}
