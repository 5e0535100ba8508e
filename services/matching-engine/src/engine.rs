//! Engine facade
//!
//! Construction spawns the per-symbol matcher workers, the fan-out worker
//! and the expiry sweeper; the public methods are the engine API invoked by
//! the REST/WS front-end and the strategy host. All methods are thread-safe
//! and non-blocking beyond queue admission: submission returns the assigned
//! order id once admitted, and callers observe later state via the event
//! bus or by polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use types::account::Balance;
use types::errors::EngineError;
use types::ids::{OrderId, SequenceGenerator, Symbol, UserId};
use types::market::MarketSnapshot;
use types::order::{NewOrder, Order, OrderStatus, TimeInForce};
use types::position::Position;

use crate::book::BookSnapshot;
use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::ledger::Ledger;
use crate::metrics::MetricsSnapshot;
use crate::now_nanos;
use crate::pipeline::{self, MatcherWorker, Shared, SymbolCommand};
use crate::registry::OrderRegistry;
use crate::risk;
use crate::store::{OrderStore, TradeStore};

pub struct MatchingEngine {
    shared: Arc<Shared>,
    symbol_txs: HashMap<Symbol, mpsc::Sender<SymbolCommand>>,
    events_tx: mpsc::Sender<EngineEvent>,
    matcher_handles: Vec<JoinHandle<()>>,
    fanout_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
}

impl MatchingEngine {
    /// Start the engine: warm books from the durable store's open orders,
    /// then spawn one matcher per configured symbol, the fan-out worker and
    /// the expiry sweeper. Must run inside a tokio runtime.
    pub fn start(
        config: EngineConfig,
        order_store: Arc<dyn OrderStore>,
        trade_store: Arc<dyn TradeStore>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self, EngineError> {
        if config.symbols.is_empty() {
            return Err(EngineError::Invalid("no symbols configured".into()));
        }

        let warm = order_store
            .open_orders()
            .map_err(|err| EngineError::Internal(format!("warm start failed: {err}")))?;
        let max_warm_id = warm.iter().map(|o| o.order_id.as_u64()).max().unwrap_or(0);

        let shared = Arc::new(Shared {
            registry: RwLock::new(OrderRegistry::new()),
            ledger: RwLock::new(Ledger::new()),
            snapshots: RwLock::new(HashMap::new()),
            metrics: Default::default(),
            config,
            order_seq: SequenceGenerator::new(max_warm_id + 1),
            trade_seq: SequenceGenerator::new(1),
        });

        let mut warm_by_symbol: HashMap<Symbol, Vec<Order>> = HashMap::new();
        {
            let mut registry = shared.registry.write();
            for order in warm {
                info!(order_id = %order.order_id, symbol = %order.symbol, "warm-starting order");
                registry.insert(order.clone(), None);
                warm_by_symbol.entry(order.symbol.clone()).or_default().push(order);
            }
        }

        let (events_tx, events_rx) = mpsc::channel(shared.config.event_queue_capacity);

        let mut symbol_txs = HashMap::new();
        let mut matcher_handles = Vec::new();
        for symbol in shared.config.symbols.clone() {
            let (tx, rx) = mpsc::channel(shared.config.order_queue_capacity);
            let worker = MatcherWorker::new(
                symbol.clone(),
                Arc::clone(&shared),
                events_tx.clone(),
                warm_by_symbol.remove(&symbol).unwrap_or_default(),
            );
            matcher_handles.push(tokio::spawn(worker.run(rx)));
            symbol_txs.insert(symbol, tx);
        }

        let fanout_handle = tokio::spawn(pipeline::run_fanout(
            events_rx,
            order_store,
            trade_store,
            bus,
            Arc::clone(&shared),
        ));
        let sweeper_handle = tokio::spawn(pipeline::run_expiry_sweeper(
            Arc::clone(&shared),
            symbol_txs.clone(),
        ));

        info!(symbols = symbol_txs.len(), "matching engine started");
        Ok(Self {
            shared,
            symbol_txs,
            events_tx,
            matcher_handles,
            fanout_handle,
            sweeper_handle,
        })
    }

    /// Validate, risk-check, lock the worst-case cost and enqueue an order.
    /// Returns once the order is on its symbol queue, before matching.
    pub async fn submit_order(&self, intent: NewOrder) -> Result<OrderId, EngineError> {
        self.submit_order_with_deadline(intent, None).await
    }

    /// As [`submit_order`](Self::submit_order), but give up with
    /// `Backpressure` if the queue stays full past `deadline`.
    pub async fn submit_order_with_deadline(
        &self,
        intent: NewOrder,
        deadline: Option<Duration>,
    ) -> Result<OrderId, EngineError> {
        let admission_started = Instant::now();
        let order_id = self.admit(&intent)?;

        let tx = self
            .symbol_txs
            .get(&intent.symbol)
            .ok_or_else(|| EngineError::Invalid(format!("unknown symbol {}", intent.symbol)))?;

        // Without a deadline a full queue blocks the producer; with one,
        // waiting past it yields Backpressure without enqueueing
        let enqueued = match deadline {
            None => tx.send(SymbolCommand::Submit(order_id)).await.is_ok(),
            Some(deadline) => tokio::time::timeout(deadline, tx.send(SymbolCommand::Submit(order_id)))
                .await
                .map(|sent| sent.is_ok())
                .unwrap_or(false),
        };
        if !enqueued {
            self.rollback_admission(order_id);
            self.shared.metrics.record_backpressure();
            return Err(EngineError::Backpressure);
        }

        self.shared.metrics.record_order_admitted(admission_started.elapsed());
        Ok(order_id)
    }

    /// Submit two linked one-cancels-other legs. Both legs are admitted (or
    /// neither); the first leg to reach a fill state cancels the other.
    pub async fn submit_oco(
        &self,
        first: NewOrder,
        second: NewOrder,
    ) -> Result<(OrderId, OrderId), EngineError> {
        if first.symbol != second.symbol {
            return Err(EngineError::Invalid("OCO legs must share a symbol".into()));
        }
        if first.user_id != second.user_id {
            return Err(EngineError::Invalid("OCO legs must share a user".into()));
        }
        let symbol = first.symbol.clone();

        let first_id = self.admit(&first)?;
        let second_id = match self.admit(&second) {
            Ok(id) => id,
            Err(err) => {
                self.rollback_admission(first_id);
                return Err(err);
            }
        };
        self.shared.registry.write().link_oco(first_id, second_id);

        let tx = self
            .symbol_txs
            .get(&symbol)
            .ok_or_else(|| EngineError::Invalid(format!("unknown symbol {symbol}")))?;
        for order_id in [first_id, second_id] {
            if tx.try_send(SymbolCommand::Submit(order_id)).is_err() {
                self.rollback_admission(first_id);
                self.rollback_admission(second_id);
                self.shared.metrics.record_backpressure();
                return Err(EngineError::Backpressure);
            }
        }
        Ok((first_id, second_id))
    }

    /// Shared admission path: shape → session → caps → balance lock →
    /// registry insert.
    fn admit(&self, intent: &NewOrder) -> Result<OrderId, EngineError> {
        risk::validate_shape(intent).inspect_err(|_| self.shared.metrics.record_rejection())?;

        if !self.symbol_txs.contains_key(&intent.symbol) {
            return Err(EngineError::Invalid(format!("unknown symbol {}", intent.symbol)));
        }

        let now = now_nanos();
        let session = &self.shared.config.session;
        match intent.time_in_force {
            TimeInForce::ATO if !session.in_open_window(now) => {
                self.shared.metrics.record_rejection();
                return Err(EngineError::Invalid("ATO order outside the opening window".into()));
            }
            TimeInForce::ATC if !session.in_close_window(now) => {
                self.shared.metrics.record_rejection();
                return Err(EngineError::Invalid("ATC order outside the closing window".into()));
            }
            _ => {}
        }

        // Budget basis: last trade, then mid, then the touch the order
        // would take from
        let reference = self.market_snapshot(&intent.symbol).and_then(|m| {
            m.reference_price().or(match intent.side {
                types::order::Side::Buy => m.best_ask,
                types::order::Side::Sell => m.best_bid,
            })
        });

        let (open_orders, position_size) = {
            let registry = self.shared.registry.read();
            let ledger = self.shared.ledger.read();
            (
                registry.open_count(&intent.user_id),
                ledger.position_size(&intent.user_id, &intent.symbol, intent.position_side),
            )
        };
        let limits = self.shared.config.limits_for(&intent.user_id);
        risk::check_caps(intent, limits, open_orders, position_size, reference)
            .inspect_err(|_| self.shared.metrics.record_rejection())?;

        let lock = risk::worst_case_cost(intent, reference)
            .inspect_err(|_| self.shared.metrics.record_rejection())?;
        self.shared
            .ledger
            .write()
            .lock_admission(intent.user_id, &lock)
            .inspect_err(|_| self.shared.metrics.record_rejection())?;

        let order_id = OrderId::from_raw(self.shared.order_seq.next());
        let status = if intent.order_type.is_conditional() {
            OrderStatus::PendingNew
        } else {
            OrderStatus::New
        };
        let order = Order::admit(intent.clone(), order_id, status, now);
        self.shared.registry.write().insert(order, Some(lock));
        Ok(order_id)
    }

    /// Undo an admission whose enqueue failed: release the lock and drop
    /// the registry row.
    fn rollback_admission(&self, order_id: OrderId) {
        let record = self.shared.registry.write().remove(order_id);
        if let Some(record) = record {
            if let Some(mut lock) = record.lock {
                if let Err(err) = self
                    .shared
                    .ledger
                    .write()
                    .release_lock(record.order.user_id, &mut lock)
                {
                    warn!(%order_id, %err, "failed to release lock on admission rollback");
                }
            }
        }
    }

    /// Request a cancel. The request is applied by the symbol's matcher in
    /// arrival order; it succeeds iff the order is still non-terminal when
    /// processed. Repeated cancels are idempotent.
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<bool, EngineError> {
        let order = {
            let mut registry = self.shared.registry.write();
            // AlreadyPending still re-enqueues: the matcher-side cancel is
            // idempotent, and a retry must not depend on an earlier enqueue
            // having succeeded
            registry.begin_cancel(order_id, now_nanos())?;
            registry.get(order_id).ok_or(EngineError::NotFound(order_id))?
        };

        let tx = self
            .symbol_txs
            .get(&order.symbol)
            .ok_or_else(|| EngineError::Invalid(format!("unknown symbol {}", order.symbol)))?;
        if tx.try_send(SymbolCommand::Cancel { order_id }).is_err() {
            self.shared.metrics.record_backpressure();
            return Err(EngineError::Backpressure);
        }
        Ok(true)
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.shared.registry.read().get(order_id)
    }

    pub fn get_open_orders(&self, user_id: &UserId, symbol: Option<&Symbol>) -> Vec<Order> {
        self.shared.registry.read().list_open(user_id, symbol)
    }

    /// Latest published book snapshot with its `last_update_id`.
    pub fn get_order_book(&self, symbol: &Symbol) -> Option<BookSnapshot> {
        self.shared.snapshots.read().get(symbol).cloned()
    }

    pub fn get_positions(&self, user_id: &UserId) -> Vec<Position> {
        self.shared.ledger.read().positions(user_id)
    }

    pub fn get_balances(&self, user_id: &UserId) -> Vec<Balance> {
        self.shared.ledger.read().balances(user_id)
    }

    pub fn get_balance(&self, user_id: &UserId, asset: &str) -> Option<Balance> {
        self.shared.ledger.read().balance(user_id, asset)
    }

    /// Credit free balance (deposit flow; also used to seed tests).
    pub fn deposit(&self, user_id: UserId, asset: &str, amount: Decimal) {
        self.shared.ledger.write().deposit(user_id, asset, amount);
    }

    /// Market view for strategies, derived from the latest book snapshot.
    pub fn market_snapshot(&self, symbol: &Symbol) -> Option<MarketSnapshot> {
        let snapshot = self.shared.snapshots.read().get(symbol).cloned()?;
        Some(MarketSnapshot {
            symbol: symbol.clone(),
            last_price: snapshot.last_price,
            mark_price: snapshot.mark_price.or(snapshot.last_price),
            best_bid: snapshot.bids.first().map(|(p, _)| *p),
            best_ask: snapshot.asks.first().map(|(p, _)| *p),
            timestamp: snapshot.timestamp,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.shared.config.symbols.clone()
    }

    /// Barrier: resolves once every command enqueued on `symbol` before the
    /// call has been applied, and every event that produced has been fanned
    /// out. Gives callers read-your-writes over the store and bus.
    pub async fn flush(&self, symbol: &Symbol) -> Result<(), EngineError> {
        let tx = self
            .symbol_txs
            .get(symbol)
            .ok_or_else(|| EngineError::Invalid(format!("unknown symbol {symbol}")))?;
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(SymbolCommand::Flush(ack_tx))
            .await
            .map_err(|_| EngineError::Internal("matcher gone".into()))?;
        ack_rx
            .await
            .map_err(|_| EngineError::Internal("matcher dropped flush barrier".into()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.events_tx
            .send(EngineEvent::Barrier(ack_tx))
            .await
            .map_err(|_| EngineError::Internal("fan-out worker gone".into()))?;
        ack_rx
            .await
            .map_err(|_| EngineError::Internal("fan-out worker dropped flush barrier".into()))?;
        Ok(())
    }

    pub async fn flush_all(&self) -> Result<(), EngineError> {
        for symbol in self.shared.config.symbols.clone() {
            self.flush(&symbol).await?;
        }
        Ok(())
    }

    /// Clean shutdown: stop ingress, drain the order and trade queues,
    /// flush the event bus, join the workers.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        info!("matching engine shutting down");
        self.sweeper_handle.abort();
        // The sweeper holds queue senders; wait for it to drop them so the
        // matchers can observe channel closure
        let _ = self.sweeper_handle.await;

        // Closing the symbol queues lets each matcher drain and stop
        drop(self.symbol_txs);
        for handle in self.matcher_handles {
            let _ = handle.await;
        }

        // Matchers are gone; closing the last event sender drains fan-out
        drop(self.events_tx);
        let _ = self.fanout_handle.await;

        info!("matching engine stopped");
        Ok(())
    }
}
