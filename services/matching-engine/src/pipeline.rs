//! Ingress pipeline and workers
//!
//! Producers enqueue commands on a bounded per-symbol queue; a dedicated
//! matcher task per symbol is the sole mutator of its book, trigger book,
//! registry rows and ledger slices. Matchers emit engine events onto the
//! bounded trade queue; a fan-out task drains it into the durable store and
//! event bus with bounded retries. A sweeper task posts synthetic expiries
//! onto the owning symbol queue, preserving one-writer discipline.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use types::errors::EngineError;
use types::ids::{OrderId, SequenceGenerator, Symbol};
use types::numeric::Price;
use types::order::{Order, OrderStatus, OrderType, TimeInForce};

use crate::book::{BookSnapshot, OrderBook};
use crate::bus::EventBus;
use crate::config::{EngineConfig, SessionConfig};
use crate::events::{EngineEvent, OrderUpdateEvent, TradeEvent};
use crate::ledger::Ledger;
use crate::matching::{self, MatchContext, MatchOutcome, Residual, TriggerBook};
use crate::metrics::EngineMetrics;
use crate::now_nanos;
use crate::registry::OrderRegistry;
use crate::store::{OrderStore, TradeStore};

/// Work items on a symbol's queue, applied in arrival order.
#[derive(Debug)]
pub enum SymbolCommand {
    Submit(OrderId),
    Cancel { order_id: OrderId },
    Expire(OrderId),
    /// Barrier: acked once every command enqueued before it has been applied
    Flush(oneshot::Sender<()>),
}

/// State shared between the engine facade and its workers.
pub(crate) struct Shared {
    pub registry: RwLock<OrderRegistry>,
    pub ledger: RwLock<Ledger>,
    pub snapshots: RwLock<HashMap<Symbol, BookSnapshot>>,
    pub metrics: EngineMetrics,
    pub config: EngineConfig,
    pub order_seq: SequenceGenerator,
    pub trade_seq: SequenceGenerator,
}

/// Single-threaded matcher for one symbol.
pub(crate) struct MatcherWorker {
    symbol: Symbol,
    book: OrderBook,
    triggers: TriggerBook,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<EngineEvent>,
    last_price: Option<Price>,
    mark_price: Option<Price>,
}

impl MatcherWorker {
    pub fn new(
        symbol: Symbol,
        shared: Arc<Shared>,
        events_tx: mpsc::Sender<EngineEvent>,
        warm_orders: Vec<Order>,
    ) -> Self {
        let mut worker = Self {
            symbol,
            book: OrderBook::new(),
            triggers: TriggerBook::new(),
            shared,
            events_tx,
            last_price: None,
            mark_price: None,
        };
        for order in warm_orders {
            worker.restore(order);
        }
        worker.publish_snapshot();
        worker
    }

    /// Re-seat a previously resting order without matching (warm start).
    fn restore(&mut self, order: Order) {
        if order.order_type.is_conditional() && order.status == OrderStatus::PendingNew {
            self.triggers.insert(&order, None);
            return;
        }
        if let Some(price) = order.price {
            let display = match (order.order_type, order.iceberg_display_qty) {
                (OrderType::Iceberg, Some(display)) => display.min(order.remaining_qty()),
                _ => order.remaining_qty(),
            };
            if !display.is_zero() {
                self.book.insert(
                    order.order_id,
                    order.user_id,
                    order.trading_mode,
                    order.side,
                    price,
                    display,
                );
            }
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<SymbolCommand>) {
        info!(symbol = %self.symbol, "matcher started");
        while let Some(command) = rx.recv().await {
            if let Err(err) = self.handle(command).await {
                // Invariant violation: preserve last-known consistent state
                // and stop processing this symbol
                error!(symbol = %self.symbol, %err, "matcher quiesced on invariant violation");
                break;
            }
        }
        self.publish_snapshot();
        info!(symbol = %self.symbol, "matcher stopped");
    }

    async fn handle(&mut self, command: SymbolCommand) -> Result<(), EngineError> {
        match command {
            SymbolCommand::Submit(order_id) => {
                let Some(order) = self.shared.registry.read().get(order_id) else {
                    return Ok(());
                };
                match order.status {
                    // Cancelled (e.g. OCO sibling) or rejected before we got here
                    status if status.is_terminal() => return Ok(()),
                    // Cancel was requested before matching; let the queued
                    // cancel command finalize it without ever matching
                    OrderStatus::PendingCancel => return Ok(()),
                    OrderStatus::PendingNew if order.order_type.is_conditional() => {
                        self.triggers.insert(&order, self.reference_price());
                        self.emit_order_update(&order).await;
                        // Already-crossed triggers fire immediately
                        let promoted = self.triggers.on_price(self.last_price, self.mark_price);
                        self.execute_promotions(promoted).await?;
                    }
                    _ => {
                        self.execute_order(order).await?;
                    }
                }
                self.publish_snapshot();
            }
            SymbolCommand::Cancel { order_id } => {
                self.finalize_terminal(order_id, OrderStatus::Cancelled).await?;
                self.publish_snapshot();
            }
            SymbolCommand::Expire(order_id) => {
                self.finalize_terminal(order_id, OrderStatus::Expired).await?;
                self.publish_snapshot();
            }
            SymbolCommand::Flush(ack) => {
                self.publish_snapshot();
                let _ = ack.send(());
            }
        }
        Ok(())
    }

    /// Run a taker (and any conditional orders it triggers) to completion.
    async fn execute_order(&mut self, order: Order) -> Result<(), EngineError> {
        let mut queue = VecDeque::from([order]);
        while let Some(mut taker) = queue.pop_front() {
            let live = self
                .shared
                .registry
                .read()
                .status(taker.order_id)
                .is_some_and(|s| !s.is_terminal() && s != OrderStatus::PendingCancel);
            if !live {
                continue;
            }

            let outcome = {
                let ctx = MatchContext {
                    fees: &self.shared.config.fee_schedule,
                    trade_seq: &self.shared.trade_seq,
                    self_trade_prevention: self.shared.config.self_trade_prevention,
                    timestamp: now_nanos(),
                };
                matching::execute(&mut self.book, &mut taker, &ctx)
            };
            let promoted = self.apply_outcome(&mut taker, outcome).await?;
            for order_id in promoted {
                if let Some(promoted_order) = self.promote(order_id)? {
                    queue.push_back(promoted_order);
                }
            }
        }
        Ok(())
    }

    async fn execute_promotions(&mut self, promoted: Vec<OrderId>) -> Result<(), EngineError> {
        for order_id in promoted {
            if let Some(order) = self.promote(order_id)? {
                self.execute_order(order).await?;
            }
        }
        Ok(())
    }

    /// Apply trades, maker bookkeeping and the residual disposition of one
    /// executed taker. Returns conditional orders triggered by the trades.
    async fn apply_outcome(
        &mut self,
        taker: &mut Order,
        outcome: MatchOutcome,
    ) -> Result<Vec<OrderId>, EngineError> {
        let ts = now_nanos();

        // Self-trade prevention removed these from the book already
        for order_id in outcome.stp_cancelled {
            debug!(symbol = %self.symbol, %order_id, "self-trade prevention cancel");
            self.finalize_terminal(order_id, OrderStatus::Cancelled).await?;
        }

        let mut taker_lock = self.shared.registry.write().take_lock(taker.order_id);
        let mut promoted = Vec::new();

        for execution in outcome.executions {
            let trade = execution.trade;

            // Maker fill: registry accounting, settlement, iceberg
            // replenishment, OCO sibling
            let maker = {
                let mut registry = self.shared.registry.write();
                let maker = registry.apply_fill(trade.maker_order_id, trade.quantity, trade.price, ts)?;
                let mut ledger = self.shared.ledger.write();
                ledger.settle_fill(
                    &maker,
                    registry.lock_mut(trade.maker_order_id),
                    trade.quantity,
                    trade.price,
                    trade.maker_commission.amount,
                    &trade.maker_commission.asset,
                    ts,
                )?;
                if maker.is_filled() {
                    if let Some(mut lock) = registry.take_lock(trade.maker_order_id) {
                        ledger.release_lock(maker.user_id, &mut lock)?;
                    }
                }
                maker
            };

            // Taker settlement
            {
                let mut ledger = self.shared.ledger.write();
                ledger.settle_fill(
                    taker,
                    taker_lock.as_mut(),
                    trade.quantity,
                    trade.price,
                    trade.taker_commission.amount,
                    &trade.taker_commission.asset,
                    ts,
                )?;
            }

            // An iceberg maker whose visible slice was consumed replenishes
            // at the tail with fresh time priority
            if !maker.is_filled() && execution.maker_entry_removed && maker.order_type == OrderType::Iceberg {
                if let (Some(price), Some(display)) = (maker.price, maker.iceberg_display_qty) {
                    let slice = display.min(maker.remaining_qty());
                    if !slice.is_zero() {
                        self.book.insert(
                            maker.order_id,
                            maker.user_id,
                            maker.trading_mode,
                            maker.side,
                            price,
                            slice,
                        );
                    }
                }
            }

            self.emit_order_update(&maker).await;
            if maker.is_filled() {
                self.cancel_oco_sibling(maker.order_id).await?;
            }

            self.last_price = Some(trade.price);
            self.shared.metrics.record_trade();
            self.emit(EngineEvent::Trade(trade)).await;

            // Conditional orders react to every trade
            promoted.extend(self.triggers.on_price(self.last_price, self.mark_price));
        }

        // Residual disposition
        match outcome.residual {
            Residual::Rest { price, display_qty } => {
                self.book.insert(
                    taker.order_id,
                    taker.user_id,
                    taker.trading_mode,
                    taker.side,
                    price,
                    display_qty,
                );
            }
            Residual::Cancel => {
                taker.transition(OrderStatus::Cancelled, ts);
                self.release_lock_if_any(taker, &mut taker_lock)?;
            }
            Residual::Reject(reason) => {
                warn!(symbol = %self.symbol, order_id = %taker.order_id, %reason, "order rejected by matcher");
                taker.transition(OrderStatus::Rejected, ts);
                self.release_lock_if_any(taker, &mut taker_lock)?;
                self.shared.metrics.record_rejection();
            }
            Residual::Done => {
                // Price improvement was refunded per fill; release any dust
                self.release_lock_if_any(taker, &mut taker_lock)?;
            }
        }

        {
            let mut registry = self.shared.registry.write();
            registry.sync(taker.clone());
            if let Some(lock) = taker_lock.take() {
                if lock.remaining > rust_decimal::Decimal::ZERO {
                    registry.put_lock(taker.order_id, lock);
                }
            }
        }
        self.emit_order_update(taker).await;
        if taker.has_fills() {
            self.cancel_oco_sibling(taker.order_id).await?;
        }

        Ok(promoted)
    }

    fn release_lock_if_any(
        &self,
        order: &Order,
        lock: &mut Option<crate::risk::CostLock>,
    ) -> Result<(), EngineError> {
        if let Some(lock) = lock.as_mut() {
            self.shared.ledger.write().release_lock(order.user_id, lock)?;
        }
        Ok(())
    }

    /// Promote a triggered conditional order to its executable form.
    fn promote(&mut self, order_id: OrderId) -> Result<Option<Order>, EngineError> {
        let ts = now_nanos();
        let mut registry = self.shared.registry.write();
        let Some(mut order) = registry.get(order_id) else {
            return Ok(None);
        };
        if order.status != OrderStatus::PendingNew {
            return Ok(None);
        }
        order.order_type = match order.order_type {
            OrderType::StopLoss | OrderType::TakeProfit | OrderType::TrailingStop => OrderType::Market,
            OrderType::StopLimit | OrderType::TakeProfitLimit => OrderType::Limit,
            other => other,
        };
        order.transition(OrderStatus::New, ts);
        registry.sync(order.clone());
        debug!(symbol = %self.symbol, %order_id, order_type = ?order.order_type, "conditional order triggered");
        Ok(Some(order))
    }

    /// Take an order out of the book/trigger set and move it to a terminal
    /// state, releasing its remaining lock. Idempotent on already-terminal
    /// and unknown orders.
    async fn finalize_terminal(&mut self, order_id: OrderId, status: OrderStatus) -> Result<(), EngineError> {
        self.book.remove(order_id);
        self.triggers.remove(order_id);

        let updated = {
            let mut registry = self.shared.registry.write();
            match registry.transition(order_id, status, now_nanos()) {
                Ok(order) => {
                    if let Some(mut lock) = registry.take_lock(order_id) {
                        self.shared.ledger.write().release_lock(order.user_id, &mut lock)?;
                    }
                    Some(order)
                }
                Err(EngineError::NotCancellable { .. }) | Err(EngineError::NotFound(_)) => None,
                Err(other) => return Err(other),
            }
        };
        if let Some(order) = updated {
            self.emit_order_update(&order).await;
        }
        Ok(())
    }

    async fn cancel_oco_sibling(&mut self, order_id: OrderId) -> Result<(), EngineError> {
        let sibling = self.shared.registry.read().oco_sibling(order_id);
        if let Some(sibling) = sibling {
            let open = self
                .shared
                .registry
                .read()
                .status(sibling)
                .is_some_and(|s| !s.is_terminal());
            if open {
                debug!(symbol = %self.symbol, %order_id, %sibling, "cancelling OCO sibling");
                self.finalize_terminal(sibling, OrderStatus::Cancelled).await?;
            }
        }
        Ok(())
    }

    fn reference_price(&self) -> Option<Price> {
        self.last_price.or_else(|| self.book.mid())
    }

    async fn emit(&self, event: EngineEvent) {
        // Receiver gone only during shutdown drain
        let _ = self.events_tx.send(event).await;
    }

    async fn emit_order_update(&self, order: &Order) {
        self.emit(EngineEvent::OrderUpdate {
            order: order.clone(),
            last_update_id: self.book.last_update_id(),
        })
        .await;
    }

    fn publish_snapshot(&self) {
        let snapshot = self.book.snapshot(
            &self.symbol,
            self.shared.config.snapshot_depth,
            self.last_price,
            self.mark_price,
            now_nanos(),
        );
        self.shared.snapshots.write().insert(self.symbol.clone(), snapshot);
    }
}

/// Drain engine events into the durable store and event bus.
///
/// Failures are retried with bounded exponential backoff and then
/// dead-lettered; they never reach the matchers.
pub(crate) async fn run_fanout(
    mut rx: mpsc::Receiver<EngineEvent>,
    order_store: Arc<dyn OrderStore>,
    trade_store: Arc<dyn TradeStore>,
    bus: Arc<dyn EventBus>,
    shared: Arc<Shared>,
) {
    let attempts = shared.config.fanout_max_attempts;
    let backoff = shared.config.fanout_retry_backoff_ms;
    info!("trade fan-out worker started");

    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Barrier(ack) => {
                let _ = ack.send(());
            }
            EngineEvent::OrderUpdate { order, last_update_id } => {
                if !deliver(attempts, backoff, "store.upsert_order", || {
                    order_store.upsert_order(&order)
                })
                .await
                {
                    shared.metrics.record_dead_letter();
                }
                let payload = OrderUpdateEvent::from_order(&order, last_update_id);
                if !deliver(attempts, backoff, "bus.order_updates", || {
                    bus.publish_order_update(&payload)
                })
                .await
                {
                    shared.metrics.record_dead_letter();
                }
            }
            EngineEvent::Trade(trade) => {
                if !deliver(attempts, backoff, "store.insert_trade", || {
                    trade_store.insert_trade(&trade)
                })
                .await
                {
                    shared.metrics.record_dead_letter();
                }
                let payload = TradeEvent::from_trade(&trade);
                if !deliver(attempts, backoff, "bus.trades", || bus.publish_trade(&payload)).await {
                    shared.metrics.record_dead_letter();
                }
            }
        }
    }

    if let Err(err) = bus.flush() {
        warn!(%err, "event bus flush failed on shutdown");
    }
    info!("trade fan-out worker stopped");
}

/// Run `op` with bounded exponential backoff. Returns false once attempts
/// are exhausted (caller dead-letters).
async fn deliver<E: std::fmt::Display>(
    attempts: u32,
    backoff_ms: u64,
    what: &str,
    mut op: impl FnMut() -> Result<(), E>,
) -> bool {
    let mut delay = backoff_ms;
    for attempt in 1..=attempts.max(1) {
        match op() {
            Ok(()) => return true,
            Err(err) => {
                warn!(%err, what, attempt, "fan-out delivery failed");
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
    false
}

/// Whether an order's time-in-force has elapsed.
pub(crate) fn is_expired(order: &Order, now: i64, session: &SessionConfig) -> bool {
    match order.time_in_force {
        TimeInForce::GTD => order.expire_time.is_some_and(|t| now >= t),
        TimeInForce::DAY => session.is_closed(now),
        _ => false,
    }
}

/// Post synthetic expiries onto the owning symbol queues.
pub(crate) async fn run_expiry_sweeper(
    shared: Arc<Shared>,
    txs: HashMap<Symbol, mpsc::Sender<SymbolCommand>>,
) {
    let mut ticker =
        tokio::time::interval(Duration::from_millis(shared.config.expiry_sweep_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now = now_nanos();
        let expired: Vec<Order> = shared
            .registry
            .read()
            .all_open()
            .into_iter()
            .filter(|o| is_expired(o, now, &shared.config.session))
            .collect();
        for order in expired {
            if let Some(tx) = txs.get(&order.symbol) {
                // Re-sent next sweep if the queue is momentarily full
                let _ = tx.try_send(SymbolCommand::Expire(order.order_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::UserId;
    use types::numeric::Quantity;
    use types::order::{NewOrder, Side};

    #[test]
    fn test_is_expired_gtd() {
        let mut intent = NewOrder::limit(
            UserId::new(),
            Symbol::new("BTC/USDT"),
            Side::Buy,
            Quantity::from_u64(1),
            Price::from_u64(100),
        );
        intent.time_in_force = TimeInForce::GTD;
        intent.expire_time = Some(1_000);
        let order = Order::admit(intent, OrderId::from_raw(1), OrderStatus::New, 0);

        let session = SessionConfig::default();
        assert!(!is_expired(&order, 999, &session));
        assert!(is_expired(&order, 1_000, &session));
    }

    #[test]
    fn test_is_expired_day_at_session_close() {
        let mut intent = NewOrder::limit(
            UserId::new(),
            Symbol::new("BTC/USDT"),
            Side::Buy,
            Quantity::from_u64(1),
            Price::from_u64(100),
        );
        intent.time_in_force = TimeInForce::DAY;
        let order = Order::admit(intent, OrderId::from_raw(1), OrderStatus::New, 0);

        let session = SessionConfig {
            open_time: 0,
            close_time: 5_000,
            auction_window: 100,
        };
        assert!(!is_expired(&order, 4_999, &session));
        assert!(is_expired(&order, 5_000, &session));
    }

    #[tokio::test]
    async fn test_deliver_retries_until_success() {
        let mut failures = 2;
        let ok = deliver(3, 1, "test", || {
            if failures > 0 {
                failures -= 1;
                Err("down")
            } else {
                Ok(())
            }
        })
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_deliver_gives_up_after_attempts() {
        let ok = deliver(2, 1, "test", || Err::<(), _>("down")).await;
        assert!(!ok);
    }
}
