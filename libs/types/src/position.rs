//! Per-symbol position state
//!
//! Positions are keyed by `(user, symbol, position_side)`. Hedge-mode LONG
//! and SHORT rows are independent; the one-way BOTH row nets buys against
//! sells and may flip direction. Size is always non-negative; direction is
//! carried separately so the flip case stays explicit.

use crate::errors::LedgerError;
use crate::ids::{Symbol, UserId};
use crate::numeric::{Price, Quantity};
use crate::order::{MarginType, PositionSide, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maintenance margin as a fraction of position notional.
pub const MAINTENANCE_MARGIN_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 3); // 0.005

/// Position state for one `(user, symbol, position_side)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: Uuid,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub position_side: PositionSide,
    /// Magnitude of the position; never negative
    pub size: Quantity,
    /// Direction of the exposure; None while flat in one-way mode
    pub exposure: Option<Side>,
    /// Quantity-weighted average entry, None while flat
    pub entry_price: Option<Price>,
    pub mark_price: Option<Price>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    /// Margin consumed by this position (maintained by the ledger)
    pub margin: Decimal,
    pub initial_margin: Decimal,
    pub maintenance_margin: Decimal,
    pub leverage: Decimal,
    pub margin_type: MarginType,
    pub updated_time: i64,
}

impl Position {
    pub fn new(
        user_id: UserId,
        symbol: Symbol,
        position_side: PositionSide,
        leverage: Decimal,
        margin_type: MarginType,
        timestamp: i64,
    ) -> Self {
        let exposure = match position_side {
            PositionSide::Long => Some(Side::Buy),
            PositionSide::Short => Some(Side::Sell),
            PositionSide::Both => None,
        };
        Self {
            position_id: Uuid::now_v7(),
            user_id,
            symbol,
            position_side,
            size: Quantity::zero(),
            exposure,
            entry_price: None,
            mark_price: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            margin: Decimal::ZERO,
            initial_margin: Decimal::ZERO,
            maintenance_margin: Decimal::ZERO,
            leverage,
            margin_type,
            updated_time: timestamp,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    /// +1 for long exposure, -1 for short, 0 while flat in one-way mode.
    fn direction(&self) -> Decimal {
        match self.exposure {
            Some(Side::Buy) => Decimal::ONE,
            Some(Side::Sell) => -Decimal::ONE,
            None => Decimal::ZERO,
        }
    }

    /// Apply one fill to this position.
    ///
    /// Returns the realized PnL delta (non-zero only when size decreased).
    /// A fill in the exposure direction grows the position with a weighted
    /// entry price; a fill against it reduces first and, in one-way mode,
    /// flips any remainder into a fresh position at the fill price. Hedge
    /// positions never flip: reducing past zero is an error the risk gate
    /// must prevent.
    pub fn apply_fill(
        &mut self,
        side: Side,
        qty: Quantity,
        price: Price,
        timestamp: i64,
    ) -> Result<Decimal, LedgerError> {
        let grows = match self.exposure {
            None => {
                self.exposure = Some(side);
                true
            }
            Some(exposure) => side == exposure,
        };

        let realized = if grows {
            self.increase(qty, price);
            Decimal::ZERO
        } else {
            let reduce_qty = qty.min(self.size);
            let overshoot = qty - reduce_qty;
            if !overshoot.is_zero() && self.position_side != PositionSide::Both {
                return Err(LedgerError::ReduceExceedsPosition {
                    position_size: self.size.as_decimal(),
                    reduce_by: qty.as_decimal(),
                });
            }
            let realized = self.decrease(reduce_qty, price);
            if !overshoot.is_zero() {
                // One-way flip: the overshoot opens in the other direction
                self.exposure = Some(side);
                self.increase(overshoot, price);
            }
            realized
        };

        self.mark_price = Some(price);
        self.recompute_margins();
        self.refresh_unrealized();
        self.updated_time = timestamp;
        Ok(realized)
    }

    fn increase(&mut self, qty: Quantity, price: Price) {
        if qty.is_zero() {
            return;
        }
        let prev_notional = match self.entry_price {
            Some(entry) if !self.size.is_zero() => self.size * entry,
            _ => Decimal::ZERO,
        };
        let new_size = self.size + qty;
        let new_notional = prev_notional + qty * price;
        self.entry_price = Price::try_new(new_notional / new_size.as_decimal());
        self.size = new_size;
    }

    fn decrease(&mut self, qty: Quantity, price: Price) -> Decimal {
        if qty.is_zero() {
            return Decimal::ZERO;
        }
        let entry = match self.entry_price {
            Some(entry) => entry,
            None => return Decimal::ZERO,
        };
        let realized = (price.as_decimal() - entry.as_decimal()) * qty.as_decimal() * self.direction();
        self.realized_pnl += realized;
        self.size = self.size - qty;
        if self.size.is_zero() {
            self.entry_price = None;
            if self.position_side == PositionSide::Both {
                self.exposure = None;
            }
        }
        realized
    }

    /// Update the mark price and recompute unrealized PnL.
    pub fn update_mark(&mut self, mark: Price, timestamp: i64) {
        self.mark_price = Some(mark);
        self.refresh_unrealized();
        self.updated_time = timestamp;
    }

    fn refresh_unrealized(&mut self) {
        self.unrealized_pnl = match (self.entry_price, self.mark_price) {
            (Some(entry), Some(mark)) if !self.size.is_zero() => {
                (mark.as_decimal() - entry.as_decimal()) * self.size.as_decimal() * self.direction()
            }
            _ => Decimal::ZERO,
        };
    }

    fn recompute_margins(&mut self) {
        let notional = match self.entry_price {
            Some(entry) => self.size * entry,
            None => Decimal::ZERO,
        };
        self.initial_margin = if self.leverage > Decimal::ZERO {
            notional / self.leverage
        } else {
            notional
        };
        self.maintenance_margin = notional * MAINTENANCE_MARGIN_RATE;
    }
}
