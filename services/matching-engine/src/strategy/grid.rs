//! Grid trading strategy
//!
//! Lays a ladder of price levels between a lower and upper bound and keeps
//! one resting buy below the market and one resting sell above it. A filled
//! or cancelled level re-arms on a later poll.

use std::collections::HashSet;
use std::time::Duration;

use rust_decimal::Decimal;
use types::ids::{Symbol, UserId};
use types::market::MarketSnapshot;
use types::numeric::Price;
use types::numeric::Quantity;
use types::order::{NewOrder, Side};
use types::position::Position;

use crate::events::OrderUpdateEvent;
use crate::strategy::Strategy;

#[derive(Debug, Clone)]
pub struct GridConfig {
    pub lower: Price,
    pub upper: Price,
    pub levels: u32,
    pub qty_per_level: Quantity,
    pub poll_interval: Duration,
}

pub struct GridStrategy {
    symbol: Symbol,
    user: UserId,
    config: GridConfig,
    grid: Vec<Price>,
    /// Level prices with a live resting order
    live: HashSet<String>,
}

impl GridStrategy {
    pub fn new(symbol: Symbol, user: UserId, config: GridConfig) -> Self {
        let grid = Self::build_grid(&config);
        Self {
            symbol,
            user,
            config,
            grid,
            live: HashSet::new(),
        }
    }

    fn build_grid(config: &GridConfig) -> Vec<Price> {
        let lower = config.lower.as_decimal();
        let upper = config.upper.as_decimal();
        let levels = Decimal::from(config.levels.max(1));
        let spacing = (upper - lower) / levels;
        (0..=config.levels)
            .filter_map(|i| Price::try_new(lower + spacing * Decimal::from(i)))
            .collect()
    }

    /// Closest grid price strictly below the reference.
    fn buy_level(&self, reference: Price) -> Option<Price> {
        self.grid.iter().rev().find(|p| **p < reference).copied()
    }

    /// Closest grid price strictly above the reference.
    fn sell_level(&self, reference: Price) -> Option<Price> {
        self.grid.iter().find(|p| **p > reference).copied()
    }

    fn level_order(&mut self, side: Side, price: Price) -> Option<NewOrder> {
        let key = price.to_string();
        if self.live.contains(&key) {
            return None;
        }
        self.live.insert(key.clone());
        let mut order = NewOrder::limit(
            self.user,
            self.symbol.clone(),
            side,
            self.config.qty_per_level,
            price,
        );
        order.client_order_id = format!("grid-{key}");
        Some(order)
    }
}

impl Strategy for GridStrategy {
    fn name(&self) -> &str {
        "grid"
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    fn generate_orders(&mut self, market: &MarketSnapshot, _positions: &[Position]) -> Vec<NewOrder> {
        let Some(reference) = market.reference_price() else {
            return Vec::new();
        };
        let mut orders = Vec::new();
        if let Some(buy) = self.buy_level(reference) {
            orders.extend(self.level_order(Side::Buy, buy));
        }
        if let Some(sell) = self.sell_level(reference) {
            orders.extend(self.level_order(Side::Sell, sell));
        }
        orders
    }

    fn on_order_update(&mut self, update: &OrderUpdateEvent) {
        // Re-arm the level once its order leaves the book
        if update.user_id == self.user && update.status.is_terminal() {
            if let Some(price) = update.price {
                self.live.remove(&price.to_string());
            }
        }
    }
}

impl GridStrategy {
    #[cfg(test)]
    fn live_levels(&self) -> usize {
        self.live.len()
    }
}
