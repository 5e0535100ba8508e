//! Crossing detection
//!
//! A taker crosses a resting maker when its limit allows trading at the
//! maker's price: bid ≥ ask for buys, ask ≤ bid for sells. A taker without
//! a limit (market order) crosses everything.

use types::numeric::Price;
use types::order::Side;

/// Whether a taker with `taker_limit` can trade against a maker resting at
/// `maker_price`.
pub fn crosses(taker_side: Side, taker_limit: Option<Price>, maker_price: Price) -> bool {
    match (taker_side, taker_limit) {
        (_, None) => true,
        (Side::Buy, Some(limit)) => limit >= maker_price,
        (Side::Sell, Some(limit)) => limit <= maker_price,
    }
}
