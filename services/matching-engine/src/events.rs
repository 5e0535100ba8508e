//! Event structures emitted during matching
//!
//! `OrderUpdateEvent` and `TradeEvent` are the bus payloads for the
//! `order_updates` and `trades` topics; `EngineEvent` is the internal
//! envelope the matcher hands to the fan-out worker.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use types::ids::{OrderId, Symbol, TradeId, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderStatus, OrderType, Side};
use types::trade::Trade;

/// Payload of the `order_updates` topic. Partitioned by symbol; per-symbol
/// ordering follows matcher emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdateEvent {
    pub order_id: OrderId,
    pub client_order_id: String,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub executed_qty: Quantity,
    pub avg_price: Option<Price>,
    pub last_update_id: u64,
}

impl OrderUpdateEvent {
    pub fn from_order(order: &Order, last_update_id: u64) -> Self {
        Self {
            order_id: order.order_id,
            client_order_id: order.client_order_id.clone(),
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            order_type: order.order_type,
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            status: order.status,
            executed_qty: order.executed_qty,
            avg_price: order.avg_price(),
            last_update_id,
        }
    }
}

/// Payload of the `trades` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: TradeId,
    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub timestamp: i64,
    pub last_update_id: u64,
}

impl TradeEvent {
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            trade_id: trade.trade_id,
            taker_order_id: trade.taker_order_id,
            maker_order_id: trade.maker_order_id,
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            price: trade.price,
            timestamp: trade.executed_at,
            last_update_id: trade.update_id,
        }
    }
}

/// Internal envelope from matcher workers to the fan-out worker.
#[derive(Debug)]
pub enum EngineEvent {
    OrderUpdate {
        order: Order,
        last_update_id: u64,
    },
    Trade(Trade),
    /// Flush barrier: acked once every event enqueued before it has been
    /// delivered to the store and bus.
    Barrier(oneshot::Sender<()>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;
    use types::order::NewOrder;

    #[test]
    fn test_order_update_from_order() {
        let intent = NewOrder::limit(
            UserId::new(),
            Symbol::new("BTC/USDT"),
            Side::Buy,
            Quantity::from_str("1.0").unwrap(),
            Price::from_u64(50_000),
        );
        let mut order = Order::admit(intent, OrderId::from_raw(9), OrderStatus::New, 0);
        order.record_fill(Quantity::from_str("0.4").unwrap(), Price::from_u64(49_999), 1);

        let event = OrderUpdateEvent::from_order(&order, 77);
        assert_eq!(event.order_id, OrderId::from_raw(9));
        assert_eq!(event.status, OrderStatus::PartiallyFilled);
        assert_eq!(event.executed_qty, Quantity::from_str("0.4").unwrap());
        assert_eq!(event.avg_price.unwrap(), Price::from_u64(49_999));
        assert_eq!(event.last_update_id, 77);
    }
}
