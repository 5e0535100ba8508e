//! Taker execution
//!
//! Applies one incoming order to a book and produces the ordered trades plus
//! the residual disposition. Invoked only from the symbol's matcher worker;
//! registry and ledger effects of the returned executions are applied by the
//! caller.

use rust_decimal::Decimal;
use types::fee::FeeSchedule;
use types::ids::{OrderId, SequenceGenerator, Symbol, TradeId};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderType, Side, TimeInForce, TradingMode};
use types::trade::{Commission, Trade};

use crate::book::OrderBook;
use crate::matching::crossing;

/// Matching inputs shared across one execution.
pub struct MatchContext<'a> {
    pub fees: &'a FeeSchedule,
    pub trade_seq: &'a SequenceGenerator,
    pub self_trade_prevention: bool,
    pub timestamp: i64,
}

/// One trade plus what it did to the maker's book entry.
#[derive(Debug)]
pub struct Execution {
    pub trade: Trade,
    /// True when the maker's visible entry was fully consumed and left the
    /// book with this trade (iceberg replenishment hook).
    pub maker_entry_removed: bool,
}

/// What happens to the taker after matching.
#[derive(Debug, PartialEq)]
pub enum Residual {
    /// Remainder rests on the taker's own side
    Rest { price: Price, display_qty: Quantity },
    /// Remainder is cancelled (market remainder, IOC)
    Cancel,
    /// Nothing executed; the order is rejected (post-only cross, FOK short)
    Reject(String),
    /// Fully filled
    Done,
}

/// Outcome of applying a taker to the book.
#[derive(Debug)]
pub struct MatchOutcome {
    pub executions: Vec<Execution>,
    /// Resting orders cancelled by self-trade prevention, oldest first
    pub stp_cancelled: Vec<OrderId>,
    pub residual: Residual,
}

/// Apply `taker` to `book`.
///
/// Conditional types never reach this function: the matcher promotes them
/// to MARKET/LIMIT before executing.
pub fn execute(book: &mut OrderBook, taker: &mut Order, ctx: &MatchContext) -> MatchOutcome {
    let limit = effective_limit(taker);
    let mut executions = Vec::new();
    let mut stp_cancelled = Vec::new();

    // Post-only orders reject instead of taking liquidity
    let post_only = taker.order_type == OrderType::LimitMaker || taker.time_in_force == TimeInForce::GTX;
    if post_only {
        if let Some(limit) = limit {
            if book.would_cross(taker.side, limit) {
                return MatchOutcome {
                    executions,
                    stp_cancelled,
                    residual: Residual::Reject("post-only order would cross the book".into()),
                };
            }
        }
    }

    // Fill-or-kill requires the full quantity to be reachable before any
    // trade is emitted
    if taker.time_in_force == TimeInForce::FOK && !fok_can_fill(book, taker, limit, ctx.self_trade_prevention) {
        return MatchOutcome {
            executions,
            stp_cancelled,
            residual: Residual::Reject("fill-or-kill order cannot be fully filled".into()),
        };
    }

    while !taker.remaining_qty().is_zero() {
        let Some((maker_price, entry)) = book.best_opposite(taker.side) else {
            break;
        };
        if !crossing::crosses(taker.side, limit, maker_price) {
            break;
        }

        // Self-trade prevention cancels the older (resting) order and keeps
        // matching
        if ctx.self_trade_prevention && entry.user_id == taker.user_id {
            book.remove(entry.order_id);
            stp_cancelled.push(entry.order_id);
            continue;
        }

        let fill_qty = taker.remaining_qty().min(entry.visible_qty);
        let (update_id, maker_entry_removed) = book
            .consume_best(taker.side, fill_qty)
            .expect("best opposite entry vanished mid-match");

        taker.record_fill(fill_qty, maker_price, ctx.timestamp);

        let trade = Trade {
            trade_id: TradeId::from_raw(ctx.trade_seq.next()),
            symbol: taker.symbol.clone(),
            taker_order_id: taker.order_id,
            maker_order_id: entry.order_id,
            taker_user_id: taker.user_id,
            maker_user_id: entry.user_id,
            side: taker.side,
            price: maker_price,
            quantity: fill_qty,
            taker_commission: party_commission(
                ctx.fees,
                &taker.symbol,
                taker.side,
                fill_qty,
                maker_price,
                false,
                taker.trading_mode,
            ),
            maker_commission: party_commission(
                ctx.fees,
                &taker.symbol,
                taker.side.opposite(),
                fill_qty,
                maker_price,
                true,
                entry.trading_mode,
            ),
            update_id,
            executed_at: ctx.timestamp,
        };
        executions.push(Execution {
            trade,
            maker_entry_removed,
        });
    }

    let residual = if taker.remaining_qty().is_zero() {
        Residual::Done
    } else if taker.order_type == OrderType::Market || taker.time_in_force == TimeInForce::IOC {
        Residual::Cancel
    } else {
        // record_fill never over-consumes, and a resting type was validated
        // to carry a price at admission
        match limit {
            Some(price) => Residual::Rest {
                price,
                display_qty: display_slice(taker),
            },
            None => Residual::Cancel,
        }
    };

    MatchOutcome {
        executions,
        stp_cancelled,
        residual,
    }
}

/// Price bound the taker may trade at; None for market orders.
fn effective_limit(taker: &Order) -> Option<Price> {
    if taker.order_type == OrderType::Market {
        None
    } else {
        taker.price
    }
}

/// The slice of the remainder that becomes visible on the book.
fn display_slice(taker: &Order) -> Quantity {
    match (taker.order_type, taker.iceberg_display_qty) {
        (OrderType::Iceberg, Some(display)) => display.min(taker.remaining_qty()),
        _ => taker.remaining_qty(),
    }
}

/// FOK liquidity check. With self-trade prevention on, the taker's own
/// resting orders do not count as reachable liquidity.
fn fok_can_fill(book: &OrderBook, taker: &Order, limit: Option<Price>, stp: bool) -> bool {
    let unbounded = Quantity::new(Decimal::MAX);
    let mut reachable = Quantity::zero();
    for walk in book.walk(taker.side, limit, unbounded) {
        if stp && walk.maker_user_id == taker.user_id {
            continue;
        }
        reachable = reachable + walk.available_qty;
        if reachable.as_decimal() >= taker.remaining_qty().as_decimal() {
            return true;
        }
    }
    false
}

fn party_commission(
    fees: &FeeSchedule,
    symbol: &Symbol,
    party_side: Side,
    qty: Quantity,
    price: Price,
    is_maker: bool,
    mode: TradingMode,
) -> Commission {
    if mode.is_cash_market() {
        fees.commission(symbol, party_side, qty, price, is_maker)
    } else {
        // Derivative commission accrues on notional in the quote asset
        let rate = if is_maker { fees.maker_rate } else { fees.taker_rate };
        Commission {
            amount: qty * price * rate,
            asset: symbol.quote().to_string(),
        }
    }
}
