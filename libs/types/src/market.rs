//! Market-data snapshots
//!
//! The per-symbol view handed to strategies on each poll. Built by the
//! engine from the latest book snapshot and trade stream; mark price falls
//! back to last trade (or mid) until an external feed supplies one.

use crate::ids::Symbol;
use crate::numeric::Price;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub last_price: Option<Price>,
    pub mark_price: Option<Price>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    /// Unix nanos
    pub timestamp: i64,
}

impl MarketSnapshot {
    /// Midpoint of the touch, when both sides are present.
    pub fn mid(&self) -> Option<Price> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => {
                Price::try_new((bid.as_decimal() + ask.as_decimal()) / rust_decimal::Decimal::TWO)
            }
            _ => None,
        }
    }

    /// Best price reference available: last trade, then mid.
    pub fn reference_price(&self) -> Option<Price> {
        self.last_price.or_else(|| self.mid())
    }
}
