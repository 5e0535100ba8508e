//! Bid and ask ladders
//!
//! Price-sorted maps of price level queues. Bids iterate highest price
//! first, asks lowest first; BTreeMap keeps iteration deterministic. Empty
//! levels are pruned on removal so `best()` never reports a hollow price.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};

use super::price_level::{LevelEntry, PriceLevel};

/// Buy-side ladder: best is the highest price.
#[derive(Debug, Clone, Default)]
pub struct BidLadder {
    levels: BTreeMap<Price, PriceLevel>,
}

/// Sell-side ladder: best is the lowest price.
#[derive(Debug, Clone, Default)]
pub struct AskLadder {
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidLadder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, price: Price, entry: LevelEntry) {
        self.levels.entry(price).or_default().push_back(entry);
    }

    pub fn remove(&mut self, price: Price, order_id: OrderId) -> Option<Quantity> {
        let level = self.levels.get_mut(&price)?;
        let removed = level.remove(order_id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(removed)
    }

    /// Reduce an entry in place; prunes the level if it empties.
    pub fn reduce(&mut self, price: Price, order_id: OrderId, by: Quantity) -> Option<bool> {
        let level = self.levels.get_mut(&price)?;
        let fully = level.reduce(order_id, by)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(fully)
    }

    pub fn best(&self) -> Option<(Price, &PriceLevel)> {
        self.levels.iter().next_back().map(|(p, l)| (*p, l))
    }

    pub fn best_mut(&mut self) -> Option<(Price, &mut PriceLevel)> {
        self.levels.iter_mut().next_back().map(|(p, l)| (*p, l))
    }

    pub fn prune_best_if_empty(&mut self) {
        if let Some((price, level)) = self.best() {
            if level.is_empty() {
                self.levels.remove(&price);
            }
        }
    }

    /// Top `depth` levels, highest price first.
    pub fn depth(&self, depth: usize) -> Vec<(Price, Quantity)> {
        self.levels
            .iter()
            .rev()
            .take(depth)
            .map(|(p, l)| (*p, l.total_quantity()))
            .collect()
    }

    /// Levels in matching priority order (highest price first).
    pub fn in_priority(&self) -> impl Iterator<Item = (Price, &PriceLevel)> {
        self.levels.iter().rev().map(|(p, l)| (*p, l))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

impl AskLadder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, price: Price, entry: LevelEntry) {
        self.levels.entry(price).or_default().push_back(entry);
    }

    pub fn remove(&mut self, price: Price, order_id: OrderId) -> Option<Quantity> {
        let level = self.levels.get_mut(&price)?;
        let removed = level.remove(order_id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(removed)
    }

    /// Reduce an entry in place; prunes the level if it empties.
    pub fn reduce(&mut self, price: Price, order_id: OrderId, by: Quantity) -> Option<bool> {
        let level = self.levels.get_mut(&price)?;
        let fully = level.reduce(order_id, by)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(fully)
    }

    pub fn best(&self) -> Option<(Price, &PriceLevel)> {
        self.levels.iter().next().map(|(p, l)| (*p, l))
    }

    pub fn best_mut(&mut self) -> Option<(Price, &mut PriceLevel)> {
        self.levels.iter_mut().next().map(|(p, l)| (*p, l))
    }

    pub fn prune_best_if_empty(&mut self) {
        if let Some((price, level)) = self.best() {
            if level.is_empty() {
                self.levels.remove(&price);
            }
        }
    }

    /// Top `depth` levels, lowest price first.
    pub fn depth(&self, depth: usize) -> Vec<(Price, Quantity)> {
        self.levels
            .iter()
            .take(depth)
            .map(|(p, l)| (*p, l.total_quantity()))
            .collect()
    }

    /// Levels in matching priority order (lowest price first).
    pub fn in_priority(&self) -> impl Iterator<Item = (Price, &PriceLevel)> {
        self.levels.iter().map(|(p, l)| (*p, l))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}
