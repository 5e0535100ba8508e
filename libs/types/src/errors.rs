//! Error taxonomy
//!
//! `EngineError` is the caller-facing surface of `submit_order` and
//! `cancel_order`. Balance and ledger errors fold into it; internal
//! invariant violations are fatal to the owning matcher, not to callers.

use crate::ids::OrderId;
use crate::order::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Caller-facing engine error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Shape or parameter violation, pre-risk
    #[error("invalid order: {0}")]
    Invalid(String),

    /// Notional, position, or open-order-count cap exceeded
    #[error("risk limit exceeded: {0}")]
    LimitExceeded(String),

    /// Worst-case cost could not be locked
    #[error("insufficient funds: {asset} required {required}, available {available}")]
    InsufficientFunds {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    /// Cancel target absent
    #[error("order not found: {0}")]
    NotFound(OrderId),

    /// Cancel target already terminal
    #[error("order {order_id} not cancellable in status {status:?}")]
    NotCancellable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Queue full or submission deadline exceeded; nothing was enqueued
    #[error("order queue full or deadline exceeded")]
    Backpressure,

    /// Engine invariant violated; the symbol is quiesced
    #[error("engine invariant violated: {0}")]
    Internal(String),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Balance operation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BalanceError {
    #[error("insufficient free {asset}: required {required}, available {available}")]
    InsufficientFree {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient locked {asset}: required {required}, available {available}")]
    InsufficientLocked {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("negative amount: {amount}")]
    NegativeAmount { amount: Decimal },
}

/// Position/settlement errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("reduce of {reduce_by} exceeds position size {position_size}")]
    ReduceExceedsPosition {
        position_size: Decimal,
        reduce_by: Decimal,
    },

    #[error("no cost lock recorded for order {0}")]
    MissingCostLock(OrderId),
}

impl EngineError {
    /// Whether this error is a synchronous admission rejection (as opposed
    /// to a lookup or transport failure).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::Invalid(_)
                | EngineError::LimitExceeded(_)
                | EngineError::InsufficientFunds { .. }
        )
    }
}
