//! Commission schedule
//!
//! Flat maker/taker rates. The buying party pays commission in the base
//! asset it receives, the selling party in the quote asset it receives.

use crate::ids::Symbol;
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use crate::trade::Commission;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maker/taker commission rates as fractions of traded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Can be negative (rebate)
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_rate: Decimal::new(2, 4),  // 0.02%
            taker_rate: Decimal::new(5, 4),  // 0.05%
        }
    }
}

impl FeeSchedule {
    /// Zero-fee schedule for tests and internal flows.
    pub fn free() -> Self {
        Self {
            maker_rate: Decimal::ZERO,
            taker_rate: Decimal::ZERO,
        }
    }

    /// Commission for one party of a fill. The buyer receives base and pays
    /// `qty × rate` of it; the seller receives quote and pays
    /// `qty × price × rate` of it.
    pub fn commission(&self, symbol: &Symbol, party_side: Side, qty: Quantity, price: Price, is_maker: bool) -> Commission {
        let rate = if is_maker { self.maker_rate } else { self.taker_rate };
        match party_side {
            Side::Buy => Commission {
                amount: qty.as_decimal() * rate,
                asset: symbol.base().to_string(),
            },
            Side::Sell => Commission {
                amount: qty * price * rate,
                asset: symbol.quote().to_string(),
            },
        }
    }
}
