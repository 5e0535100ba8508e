//! Trade execution records
//!
//! A trade is the atomic exchange between a resting maker order and the
//! incoming taker order that crossed it. Commission is charged to both
//! parties: the buying party pays in the base asset it receives, the selling
//! party in the quote asset it receives.

use crate::ids::{OrderId, Symbol, TradeId, UserId};
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Commission charged to one party of a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    pub amount: Decimal,
    pub asset: String,
}

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub symbol: Symbol,

    pub taker_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub taker_user_id: UserId,
    pub maker_user_id: UserId,

    /// Side of the taker
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,

    pub taker_commission: Commission,
    pub maker_commission: Commission,

    /// Book sequence of the mutation that produced this trade; strictly
    /// increasing per symbol
    pub update_id: u64,
    /// Unix nanos
    pub executed_at: i64,
}

impl Trade {
    /// Trade value in the quote asset (price × quantity)
    pub fn value(&self) -> Decimal {
        self.quantity * self.price
    }

    /// Commission from the perspective of one of the two orders
    pub fn commission_for(&self, order_id: OrderId) -> Option<&Commission> {
        if order_id == self.taker_order_id {
            Some(&self.taker_commission)
        } else if order_id == self.maker_order_id {
            Some(&self.maker_commission)
        } else {
            None
        }
    }

    /// Whether `order_id` participated as the maker
    pub fn is_maker(&self, order_id: OrderId) -> bool {
        order_id == self.maker_order_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromStr;

    fn make_trade() -> Trade {
        Trade {
            trade_id: TradeId::from_raw(7),
            symbol: Symbol::new("BTC/USDT"),
            taker_order_id: OrderId::from_raw(2),
            maker_order_id: OrderId::from_raw(1),
            taker_user_id: UserId::new(),
            maker_user_id: UserId::new(),
            side: Side::Buy,
            price: Price::from_u64(50_000),
            quantity: Quantity::from_str("0.5").unwrap(),
            taker_commission: Commission {
                amount: Decimal::from_str("0.00025").unwrap(),
                asset: "BTC".into(),
            },
            maker_commission: Commission {
                amount: Decimal::from(5),
                asset: "USDT".into(),
            },
            update_id: 12,
            executed_at: 1_700_000_000_000_000_000,
        }
    }

    #[test]
    fn test_trade_value() {
        assert_eq!(make_trade().value(), Decimal::from(25_000));
    }

    #[test]
    fn test_commission_lookup() {
        let trade = make_trade();
        assert_eq!(trade.commission_for(OrderId::from_raw(2)).unwrap().asset, "BTC");
        assert_eq!(trade.commission_for(OrderId::from_raw(1)).unwrap().asset, "USDT");
        assert!(trade.commission_for(OrderId::from_raw(99)).is_none());
    }

    #[test]
    fn test_maker_perspective() {
        let trade = make_trade();
        assert!(trade.is_maker(OrderId::from_raw(1)));
        assert!(!trade.is_maker(OrderId::from_raw(2)));
    }

    #[test]
    fn test_trade_serialization() {
        let trade = make_trade();
        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(trade, back);
    }
}
