//! Per-symbol two-sided limit order book
//!
//! Two price-sorted ladders of FIFO levels plus an order-id index, so
//! cancels and reductions need no caller-supplied price. Every mutation
//! bumps `last_update_id`; trades and snapshots carry the value so
//! downstream consumers can order events per symbol.

pub mod price_level;
pub mod sides;

pub use price_level::{LevelEntry, PriceLevel};
pub use sides::{AskLadder, BidLadder};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::ids::{OrderId, Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Side, TradingMode};

use crate::matching::crossing;

/// One matchable slice yielded by [`OrderBook::walk`], in priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkLevel {
    pub maker_order_id: OrderId,
    pub maker_user_id: UserId,
    pub price: Price,
    pub available_qty: Quantity,
}

/// Published book view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: Symbol,
    pub last_update_id: u64,
    /// (price, total visible quantity), best first
    pub bids: Vec<(Price, Quantity)>,
    pub asks: Vec<(Price, Quantity)>,
    pub last_price: Option<Price>,
    pub mark_price: Option<Price>,
    pub timestamp: i64,
}

/// Two-sided book for one symbol.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BidLadder,
    asks: AskLadder,
    /// Where each resting order currently sits
    index: HashMap<OrderId, (Side, Price)>,
    last_update_id: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    fn bump(&mut self) -> u64 {
        self.last_update_id += 1;
        self.last_update_id
    }

    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.best().map(|(p, l)| (p, l.total_quantity()))
    }

    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.best().map(|(p, l)| (p, l.total_quantity()))
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask.as_decimal() - bid.as_decimal()),
            _ => None,
        }
    }

    pub fn mid(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => {
                Price::try_new((bid.as_decimal() + ask.as_decimal()) / Decimal::TWO)
            }
            _ => None,
        }
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Rest an order (or an iceberg slice) at the tail of its price level.
    pub fn insert(
        &mut self,
        order_id: OrderId,
        user_id: UserId,
        trading_mode: TradingMode,
        side: Side,
        price: Price,
        visible_qty: Quantity,
    ) -> u64 {
        let entry = LevelEntry {
            order_id,
            user_id,
            trading_mode,
            visible_qty,
        };
        match side {
            Side::Buy => self.bids.insert(price, entry),
            Side::Sell => self.asks.insert(price, entry),
        }
        self.index.insert(order_id, (side, price));
        self.bump()
    }

    /// Remove a resting order entirely.
    pub fn remove(&mut self, order_id: OrderId) -> Option<(Side, Price, Quantity)> {
        let (side, price) = self.index.remove(&order_id)?;
        let removed = match side {
            Side::Buy => self.bids.remove(price, order_id),
            Side::Sell => self.asks.remove(price, order_id),
        }?;
        self.bump();
        Some((side, price, removed))
    }

    /// Reduce a resting order in place, preserving its time priority.
    /// Returns true when the entry was fully consumed and removed.
    pub fn reduce(&mut self, order_id: OrderId, by: Quantity) -> Option<bool> {
        let (side, price) = *self.index.get(&order_id)?;
        let fully = match side {
            Side::Buy => self.bids.reduce(price, order_id, by),
            Side::Sell => self.asks.reduce(price, order_id, by),
        }?;
        if fully {
            self.index.remove(&order_id);
        }
        self.bump();
        Some(fully)
    }

    /// Whether a limit order at `limit` would take liquidity immediately.
    pub fn would_cross(&self, taker_side: Side, limit: Price) -> bool {
        match taker_side {
            Side::Buy => self
                .best_ask()
                .is_some_and(|(ask, _)| crossing::crosses(Side::Buy, Some(limit), ask)),
            Side::Sell => self
                .best_bid()
                .is_some_and(|(bid, _)| crossing::crosses(Side::Sell, Some(limit), bid)),
        }
    }

    /// The front entry of the best opposite level, if any.
    pub fn best_opposite(&self, taker_side: Side) -> Option<(Price, LevelEntry)> {
        let (price, level) = match taker_side {
            Side::Buy => self.asks.best()?,
            Side::Sell => self.bids.best()?,
        };
        level.front().map(|entry| (price, entry.clone()))
    }

    /// Consume `qty` from the front of the best opposite level.
    ///
    /// Returns the update id of the mutation and whether the maker entry
    /// was fully consumed (and removed).
    pub fn consume_best(&mut self, taker_side: Side, qty: Quantity) -> Option<(u64, bool)> {
        let (front_id, entry_removed) = match taker_side {
            Side::Buy => {
                let (_, level) = self.asks.best_mut()?;
                let front_id = level.front()?.order_id;
                (front_id, level.consume_front(qty))
            }
            Side::Sell => {
                let (_, level) = self.bids.best_mut()?;
                let front_id = level.front()?.order_id;
                (front_id, level.consume_front(qty))
            }
        };
        if entry_removed {
            self.index.remove(&front_id);
        }
        match taker_side {
            Side::Buy => self.asks.prune_best_if_empty(),
            Side::Sell => self.bids.prune_best_if_empty(),
        }
        Some((self.bump(), entry_removed))
    }

    /// Yield matchable slices of the opposite side in price-time priority,
    /// stopping once `limit` stops crossing or `max_qty` is covered.
    pub fn walk(&self, taker_side: Side, limit: Option<Price>, max_qty: Quantity) -> Vec<WalkLevel> {
        let mut out = Vec::new();
        let mut remaining = max_qty;

        let mut visit = |price: Price, level: &PriceLevel| -> bool {
            if !crossing::crosses(taker_side, limit, price) {
                return false;
            }
            for entry in level.iter() {
                if remaining.is_zero() {
                    return false;
                }
                let take = remaining.min(entry.visible_qty);
                out.push(WalkLevel {
                    maker_order_id: entry.order_id,
                    maker_user_id: entry.user_id,
                    price,
                    available_qty: take,
                });
                remaining = remaining - take;
            }
            true
        };

        match taker_side {
            Side::Buy => {
                for (price, level) in self.asks.in_priority() {
                    if !visit(price, level) {
                        break;
                    }
                }
            }
            Side::Sell => {
                for (price, level) in self.bids.in_priority() {
                    if !visit(price, level) {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Total quantity reachable for a taker within `limit`, capped at
    /// `max_qty`. Used for fill-or-kill liquidity checks.
    pub fn available_within(&self, taker_side: Side, limit: Option<Price>, max_qty: Quantity) -> Quantity {
        self.walk(taker_side, limit, max_qty)
            .into_iter()
            .fold(Quantity::zero(), |acc, w| acc + w.available_qty)
    }

    pub fn snapshot(
        &self,
        symbol: &Symbol,
        depth: usize,
        last_price: Option<Price>,
        mark_price: Option<Price>,
        timestamp: i64,
    ) -> BookSnapshot {
        BookSnapshot {
            symbol: symbol.clone(),
            last_update_id: self.last_update_id,
            bids: self.bids.depth(depth),
            asks: self.asks.depth(depth),
            last_price,
            mark_price,
            timestamp,
        }
    }
}
