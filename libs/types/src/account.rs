//! Per-asset balance state
//!
//! Admission locks the worst-case cost of an order into `locked`; trade
//! settlement moves value between `locked` and `free` atomically with the
//! trade. All operations are fallible so request paths can surface
//! insufficient-funds conditions instead of panicking.

use crate::errors::BalanceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance for a single asset.
///
/// Invariant at rest: `free ≥ 0` and `locked ≥ 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub borrowed: Decimal,
    pub interest: Decimal,
}

impl Balance {
    pub fn new(asset: impl Into<String>, free: Decimal) -> Self {
        Self {
            asset: asset.into(),
            free,
            locked: Decimal::ZERO,
            borrowed: Decimal::ZERO,
            interest: Decimal::ZERO,
        }
    }

    /// `free + locked − borrowed − interest`
    pub fn net_asset(&self) -> Decimal {
        self.free + self.locked - self.borrowed - self.interest
    }

    fn check_amount(amount: Decimal) -> Result<(), BalanceError> {
        if amount < Decimal::ZERO {
            return Err(BalanceError::NegativeAmount { amount });
        }
        Ok(())
    }

    /// Move `amount` from free to locked.
    pub fn lock(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        Self::check_amount(amount)?;
        if amount > self.free {
            return Err(BalanceError::InsufficientFree {
                asset: self.asset.clone(),
                required: amount,
                available: self.free,
            });
        }
        self.free -= amount;
        self.locked += amount;
        Ok(())
    }

    /// Move `amount` from locked back to free.
    pub fn unlock(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        Self::check_amount(amount)?;
        if amount > self.locked {
            return Err(BalanceError::InsufficientLocked {
                asset: self.asset.clone(),
                required: amount,
                available: self.locked,
            });
        }
        self.locked -= amount;
        self.free += amount;
        Ok(())
    }

    /// Consume `amount` out of locked (it leaves this balance entirely,
    /// e.g. paid to the counterparty on a fill).
    pub fn spend_locked(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        Self::check_amount(amount)?;
        if amount > self.locked {
            return Err(BalanceError::InsufficientLocked {
                asset: self.asset.clone(),
                required: amount,
                available: self.locked,
            });
        }
        self.locked -= amount;
        Ok(())
    }

    /// Consume `amount` out of free (e.g. commission).
    pub fn spend_free(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        Self::check_amount(amount)?;
        if amount > self.free {
            return Err(BalanceError::InsufficientFree {
                asset: self.asset.clone(),
                required: amount,
                available: self.free,
            });
        }
        self.free -= amount;
        Ok(())
    }

    /// Credit `amount` to free.
    pub fn credit(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        Self::check_amount(amount)?;
        self.free += amount;
        Ok(())
    }

    /// Margin funding: borrowed amounts arrive in free and are owed back.
    pub fn borrow(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        Self::check_amount(amount)?;
        self.free += amount;
        self.borrowed += amount;
        Ok(())
    }

    /// Repay borrowings plus any accrued interest out of free.
    pub fn repay(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        Self::check_amount(amount)?;
        if amount > self.free {
            return Err(BalanceError::InsufficientFree {
                asset: self.asset.clone(),
                required: amount,
                available: self.free,
            });
        }
        self.free -= amount;
        let interest_part = amount.min(self.interest);
        self.interest -= interest_part;
        self.borrowed -= (amount - interest_part).min(self.borrowed);
        Ok(())
    }
}
