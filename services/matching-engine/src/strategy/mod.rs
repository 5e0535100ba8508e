//! Strategy host
//!
//! Algorithmic producers (grid, DCA, copy-trading) run on a single host
//! task. Each strategy is polled at its own cadence with the latest market
//! snapshot and its positions, and every order it produces goes through the
//! normal ingress path. A slow or failing strategy logs and is skipped; it
//! never blocks the matchers.

pub mod copy_trade;
pub mod dca;
pub mod grid;

pub use copy_trade::{CopyTradeConfig, CopyTradeStrategy};
pub use dca::{DcaConfig, DcaStrategy};
pub use grid::{GridConfig, GridStrategy};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use types::ids::{Symbol, UserId};
use types::market::MarketSnapshot;
use types::order::NewOrder;
use types::position::Position;

use crate::engine::MatchingEngine;
use crate::events::{OrderUpdateEvent, TradeEvent};

/// An algorithmic order producer.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// How often the host polls this strategy.
    fn poll_interval(&self) -> Duration;

    /// Produce orders for the current market state. Scheduling and sizing
    /// are entirely the strategy's policy.
    fn generate_orders(&mut self, market: &MarketSnapshot, positions: &[Position]) -> Vec<NewOrder>;

    fn on_trade(&mut self, _trade: &TradeEvent) {}

    fn on_order_update(&mut self, _update: &OrderUpdateEvent) {}
}

struct StrategySlot {
    strategy: Box<dyn Strategy>,
    symbol: Symbol,
    user: UserId,
    next_poll: Instant,
}

/// Polls registered strategies and injects their orders.
pub struct StrategyHost {
    engine: Arc<MatchingEngine>,
    slots: Vec<StrategySlot>,
    trade_rx: Option<broadcast::Receiver<TradeEvent>>,
    order_rx: Option<broadcast::Receiver<OrderUpdateEvent>>,
    tick: Duration,
}

impl StrategyHost {
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        Self {
            engine,
            slots: Vec::new(),
            trade_rx: None,
            order_rx: None,
            tick: Duration::from_millis(200),
        }
    }

    /// Feed bus subscriptions into strategy callbacks.
    pub fn with_event_feeds(
        mut self,
        trade_rx: broadcast::Receiver<TradeEvent>,
        order_rx: broadcast::Receiver<OrderUpdateEvent>,
    ) -> Self {
        self.trade_rx = Some(trade_rx);
        self.order_rx = Some(order_rx);
        self
    }

    pub fn register(&mut self, symbol: Symbol, user: UserId, strategy: Box<dyn Strategy>) {
        debug!(strategy = strategy.name(), %symbol, "strategy registered");
        self.slots.push(StrategySlot {
            strategy,
            symbol,
            user,
            next_poll: Instant::now(),
        });
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.drain_events();

            let now = Instant::now();
            for slot in &mut self.slots {
                if now < slot.next_poll {
                    continue;
                }
                slot.next_poll = now + slot.strategy.poll_interval();

                let Some(market) = self.engine.market_snapshot(&slot.symbol) else {
                    continue;
                };
                let positions = self.engine.get_positions(&slot.user);
                let orders = slot.strategy.generate_orders(&market, &positions);
                for mut order in orders {
                    order.user_id = slot.user;
                    match self.engine.submit_order(order).await {
                        Ok(order_id) => {
                            debug!(strategy = slot.strategy.name(), %order_id, "strategy order admitted")
                        }
                        Err(err) => {
                            warn!(strategy = slot.strategy.name(), %err, "strategy order rejected")
                        }
                    }
                }
            }
        }
    }

    fn drain_events(&mut self) {
        if let Some(rx) = self.trade_rx.as_mut() {
            while let Ok(trade) = rx.try_recv() {
                for slot in &mut self.slots {
                    if slot.symbol == trade.symbol {
                        slot.strategy.on_trade(&trade);
                    }
                }
            }
        }
        if let Some(rx) = self.order_rx.as_mut() {
            while let Ok(update) = rx.try_recv() {
                for slot in &mut self.slots {
                    if slot.symbol == update.symbol {
                        slot.strategy.on_order_update(&update);
                    }
                }
            }
        }
    }
}
