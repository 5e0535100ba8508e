//! Event bus contract
//!
//! Two logical topics: `order_updates` and `trades`, partitioned by symbol;
//! the matcher's emission order is preserved per symbol. The in-memory bus
//! broadcasts to live subscribers (strategy host, tests) and retains a log
//! so tests can assert ordering.

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::events::{OrderUpdateEvent, TradeEvent};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

pub trait EventBus: Send + Sync {
    fn publish_order_update(&self, event: &OrderUpdateEvent) -> Result<(), BusError>;
    fn publish_trade(&self, event: &TradeEvent) -> Result<(), BusError>;
    /// Flush buffered messages on shutdown.
    fn flush(&self) -> Result<(), BusError>;
}

/// Everything published, in publish order.
#[derive(Debug, Clone, PartialEq)]
pub enum BusRecord {
    OrderUpdate(OrderUpdateEvent),
    Trade(TradeEvent),
}

/// In-memory bus with broadcast fan-out and a retained log.
pub struct InMemoryBus {
    order_tx: broadcast::Sender<OrderUpdateEvent>,
    trade_tx: broadcast::Sender<TradeEvent>,
    log: RwLock<Vec<BusRecord>>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (order_tx, _) = broadcast::channel(capacity);
        let (trade_tx, _) = broadcast::channel(capacity);
        Self {
            order_tx,
            trade_tx,
            log: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe_order_updates(&self) -> broadcast::Receiver<OrderUpdateEvent> {
        self.order_tx.subscribe()
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeEvent> {
        self.trade_tx.subscribe()
    }

    pub fn records(&self) -> Vec<BusRecord> {
        self.log.read().clone()
    }

    pub fn trade_events(&self) -> Vec<TradeEvent> {
        self.log
            .read()
            .iter()
            .filter_map(|r| match r {
                BusRecord::Trade(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn order_updates(&self) -> Vec<OrderUpdateEvent> {
        self.log
            .read()
            .iter()
            .filter_map(|r| match r {
                BusRecord::OrderUpdate(o) => Some(o.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl EventBus for InMemoryBus {
    fn publish_order_update(&self, event: &OrderUpdateEvent) -> Result<(), BusError> {
        self.log.write().push(BusRecord::OrderUpdate(event.clone()));
        // No live subscribers is fine
        let _ = self.order_tx.send(event.clone());
        Ok(())
    }

    fn publish_trade(&self, event: &TradeEvent) -> Result<(), BusError> {
        self.log.write().push(BusRecord::Trade(event.clone()));
        let _ = self.trade_tx.send(event.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{OrderId, Symbol, TradeId};
    use types::numeric::{Price, Quantity};
    use types::order::Side;

    fn trade_event(id: u64, update_id: u64) -> TradeEvent {
        TradeEvent {
            trade_id: TradeId::from_raw(id),
            taker_order_id: OrderId::from_raw(1),
            maker_order_id: OrderId::from_raw(2),
            symbol: Symbol::new("BTC/USDT"),
            side: Side::Buy,
            quantity: Quantity::from_u64(1),
            price: Price::from_u64(100),
            timestamp: 0,
            last_update_id: update_id,
        }
    }

    #[test]
    fn test_log_preserves_publish_order() {
        let bus = InMemoryBus::default();
        bus.publish_trade(&trade_event(1, 10)).unwrap();
        bus.publish_trade(&trade_event(2, 11)).unwrap();

        let trades = bus.trade_events();
        assert_eq!(trades.len(), 2);
        assert!(trades[0].last_update_id < trades[1].last_update_id);
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = InMemoryBus::default();
        let mut rx = bus.subscribe_trades();
        bus.publish_trade(&trade_event(1, 10)).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.trade_id, TradeId::from_raw(1));
    }
}
