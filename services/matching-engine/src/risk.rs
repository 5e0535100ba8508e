//! Pre-admission risk gate
//!
//! Ordered checks, first failure wins: shape, notional cap, projected
//! position cap, open-order count. The balance check and worst-case cost
//! lock happen in the ledger, atomically with admission, using the
//! [`CostLock`] computed here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::EngineError;
use types::numeric::Price;
use types::order::{NewOrder, OrderType, PositionSide, Side, TimeInForce};

use crate::config::RiskLimits;

/// Worst-case cost locked at admission. `unit_cost` is the locked amount
/// per unit of base quantity, so partial fills release proportionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLock {
    pub asset: String,
    pub unit_cost: Decimal,
    /// Locked amount not yet consumed or released
    pub remaining: Decimal,
}

/// Shape and parameter validation, pre-risk.
pub fn validate_shape(intent: &NewOrder) -> Result<(), EngineError> {
    if intent.quantity.is_zero() {
        return Err(EngineError::Invalid("quantity must be positive".into()));
    }
    if intent.order_type.requires_price() && intent.price.is_none() {
        return Err(EngineError::Invalid(format!(
            "{:?} order requires a price",
            intent.order_type
        )));
    }
    if intent.order_type.requires_stop_price() && intent.stop_price.is_none() {
        return Err(EngineError::Invalid(format!(
            "{:?} order requires a stop price",
            intent.order_type
        )));
    }
    if intent.order_type == OrderType::TrailingStop
        && intent.callback_rate.is_none()
        && intent.trailing_delta.is_none()
    {
        return Err(EngineError::Invalid(
            "trailing stop requires a callback rate or trailing delta".into(),
        ));
    }
    if intent.order_type == OrderType::Iceberg {
        match intent.iceberg_display_qty {
            None => {
                return Err(EngineError::Invalid("iceberg order requires a display quantity".into()))
            }
            Some(display) if display.is_zero() || display > intent.quantity => {
                return Err(EngineError::Invalid(
                    "iceberg display quantity must be positive and at most the total quantity".into(),
                ))
            }
            Some(_) => {}
        }
    }
    if intent.leverage < Decimal::ONE {
        return Err(EngineError::Invalid("leverage must be at least 1".into()));
    }
    if intent.time_in_force == TimeInForce::GTD && intent.expire_time.is_none() {
        return Err(EngineError::Invalid("GTD order requires an expire time".into()));
    }
    if intent.reduce_only && !intent.trading_mode.tracks_positions() {
        return Err(EngineError::Invalid(
            "reduce-only applies to position-tracked trading modes".into(),
        ));
    }
    Ok(())
}

/// Price per unit the gate budgets against: the limit price where one
/// exists, the stop price for stop-market types, otherwise the current
/// reference price.
pub fn price_basis(intent: &NewOrder, reference: Option<Price>) -> Result<Decimal, EngineError> {
    intent
        .price
        .or(intent.stop_price)
        .or(reference)
        .map(|p| p.as_decimal())
        .ok_or_else(|| {
            EngineError::Invalid("no price reference available for market order".into())
        })
}

/// Worst-case cost of the order: full notional of the spending asset for
/// cash markets, initial margin in quote for derivatives.
pub fn worst_case_cost(intent: &NewOrder, reference: Option<Price>) -> Result<CostLock, EngineError> {
    let basis = price_basis(intent, reference)?;
    let (asset, unit_cost) = if intent.trading_mode.is_cash_market() {
        match intent.side {
            Side::Buy => (intent.symbol.quote().to_string(), basis),
            Side::Sell => (intent.symbol.base().to_string(), Decimal::ONE),
        }
    } else {
        (intent.symbol.quote().to_string(), basis / intent.leverage)
    };
    Ok(CostLock {
        asset,
        unit_cost,
        remaining: intent.quantity.as_decimal() * unit_cost,
    })
}

/// Notional, projected-position and open-order-count caps.
pub fn check_caps(
    intent: &NewOrder,
    limits: &RiskLimits,
    open_orders: usize,
    position_size: Decimal,
    reference: Option<Price>,
) -> Result<(), EngineError> {
    let basis = price_basis(intent, reference)?;
    let notional = intent.quantity.as_decimal() * basis;
    if notional > limits.max_notional {
        return Err(EngineError::LimitExceeded(format!(
            "notional {} exceeds cap {}",
            notional, limits.max_notional
        )));
    }

    // Hedge-mode orders against their position's direction are closes and
    // can never exceed it; one-way orders flip instead
    let closes_hedge_position = match intent.position_side {
        PositionSide::Long => intent.side == Side::Sell,
        PositionSide::Short => intent.side == Side::Buy,
        PositionSide::Both => false,
    };
    if intent.reduce_only || closes_hedge_position {
        if intent.quantity.as_decimal() > position_size {
            return Err(EngineError::Invalid(
                "reduce-only order would increase or flip the position".into(),
            ));
        }
    } else {
        let projected = position_size + intent.quantity.as_decimal();
        if projected > limits.max_position {
            return Err(EngineError::LimitExceeded(format!(
                "projected position {} exceeds cap {}",
                projected, limits.max_position
            )));
        }
    }

    if open_orders + 1 > limits.max_open_orders {
        return Err(EngineError::LimitExceeded(format!(
            "open order count {} at cap {}",
            open_orders, limits.max_open_orders
        )));
    }
    Ok(())
}
