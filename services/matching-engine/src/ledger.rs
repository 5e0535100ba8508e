//! Position & balance ledger
//!
//! Derived per-user state updated from trades. Admission locks the
//! worst-case cost of an order; each fill releases the locked cost
//! proportionally, moves value to the counterpart asset, debits commission
//! and updates the position. Cash markets transfer the base asset;
//! derivative markets move margin and realized PnL in the quote asset only.

use rust_decimal::Decimal;
use std::collections::HashMap;
use types::account::Balance;
use types::errors::{BalanceError, EngineError};
use types::ids::{Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Order, PositionSide, Side};
use types::position::Position;

use crate::risk::CostLock;

type PositionKey = (UserId, Symbol, PositionSide);

#[derive(Debug, Default)]
pub struct Ledger {
    balances: HashMap<UserId, HashMap<String, Balance>>,
    positions: HashMap<PositionKey, Position>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&mut self, user: UserId, asset: &str, amount: Decimal) {
        self.balance_mut(user, asset).free += amount;
    }

    fn balance_mut(&mut self, user: UserId, asset: &str) -> &mut Balance {
        self.balances
            .entry(user)
            .or_default()
            .entry(asset.to_string())
            .or_insert_with(|| Balance::new(asset, Decimal::ZERO))
    }

    pub fn balance(&self, user: &UserId, asset: &str) -> Option<Balance> {
        self.balances.get(user)?.get(asset).cloned()
    }

    pub fn balances(&self, user: &UserId) -> Vec<Balance> {
        let Some(assets) = self.balances.get(user) else {
            return Vec::new();
        };
        let mut out: Vec<Balance> = assets.values().cloned().collect();
        out.sort_by(|a, b| a.asset.cmp(&b.asset));
        out
    }

    pub fn free(&self, user: &UserId, asset: &str) -> Decimal {
        self.balance(user, asset).map_or(Decimal::ZERO, |b| b.free)
    }

    /// Lock the worst-case cost atomically with admission.
    pub fn lock_admission(&mut self, user: UserId, lock: &CostLock) -> Result<(), EngineError> {
        self.balance_mut(user, &lock.asset)
            .lock(lock.remaining)
            .map_err(|err| match err {
                BalanceError::InsufficientFree {
                    asset,
                    required,
                    available,
                } => EngineError::InsufficientFunds {
                    asset,
                    required,
                    available,
                },
                other => other.into(),
            })
    }

    /// Return an order's unconsumed lock to free balance (cancel, expiry,
    /// rejection, or full fill with price improvement already refunded).
    pub fn release_lock(&mut self, user: UserId, lock: &mut CostLock) -> Result<(), EngineError> {
        if lock.remaining > Decimal::ZERO {
            self.balance_mut(user, &lock.asset).unlock(lock.remaining)?;
            lock.remaining = Decimal::ZERO;
        }
        Ok(())
    }

    /// Settle one party of one fill. Returns the realized PnL delta.
    ///
    /// `order` provides the party's side, mode and position key; `lock` is
    /// its admission lock (absent for warm-started orders, in which case
    /// cash is drawn from free balance directly).
    pub fn settle_fill(
        &mut self,
        order: &Order,
        lock: Option<&mut CostLock>,
        qty: Quantity,
        price: Price,
        commission_amount: Decimal,
        commission_asset: &str,
        timestamp: i64,
    ) -> Result<Decimal, EngineError> {
        let realized = if order.trading_mode.is_cash_market() {
            self.settle_cash(order, lock, qty, price)?;
            if order.trading_mode.tracks_positions() {
                // Margin positions are bookkeeping over cash legs that
                // already moved; PnL here is reporting, not cash
                self.position_mut(order, timestamp)
                    .apply_fill(order.side, qty, price, timestamp)?;
            }
            Decimal::ZERO
        } else {
            self.settle_derivative(order, lock, qty, price, timestamp)?
        };

        if commission_amount > Decimal::ZERO {
            self.balance_mut(order.user_id, commission_asset)
                .spend_free(commission_amount)?;
        }
        Ok(realized)
    }

    fn settle_cash(
        &mut self,
        order: &Order,
        lock: Option<&mut CostLock>,
        qty: Quantity,
        price: Price,
    ) -> Result<(), EngineError> {
        let (base, quote) = {
            let (b, q) = order.symbol.split();
            (b.to_string(), q.to_string())
        };
        let cost = qty * price;
        match order.side {
            Side::Buy => {
                // Release the locked budget for this quantity, pay the
                // actual cost, refund the price improvement
                let release = Self::consume_lock(lock, qty.as_decimal());
                let quote_balance = self.balance_mut(order.user_id, &quote);
                quote_balance.spend_locked(release)?;
                if cost <= release {
                    quote_balance.credit(release - cost)?;
                } else {
                    quote_balance.spend_free(cost - release)?;
                }
                self.balance_mut(order.user_id, &base).credit(qty.as_decimal())?;
            }
            Side::Sell => {
                let release = Self::consume_lock(lock, qty.as_decimal());
                let base_balance = self.balance_mut(order.user_id, &base);
                base_balance.spend_locked(release)?;
                let shortfall = qty.as_decimal() - release;
                if shortfall > Decimal::ZERO {
                    base_balance.spend_free(shortfall)?;
                }
                self.balance_mut(order.user_id, &quote).credit(cost)?;
            }
        }
        Ok(())
    }

    fn settle_derivative(
        &mut self,
        order: &Order,
        lock: Option<&mut CostLock>,
        qty: Quantity,
        price: Price,
        timestamp: i64,
    ) -> Result<Decimal, EngineError> {
        let quote = order.symbol.quote().to_string();

        // Split the fill into the portion that reduces the current
        // exposure and the portion that opens new exposure, before the
        // position mutates
        let position = self.position_mut(order, timestamp);
        let reduces = position.exposure.is_some_and(|e| e != order.side);
        let reduce_qty = if reduces { qty.min(position.size) } else { Quantity::zero() };
        let increase_qty = qty - reduce_qty;
        let size_before = position.size;
        let margin_before = position.margin;

        let realized = position.apply_fill(order.side, qty, price, timestamp)?;

        // Reduced exposure frees its share of consumed margin
        let margin_release = if !reduce_qty.is_zero() && !size_before.is_zero() {
            margin_before * reduce_qty.as_decimal() / size_before.as_decimal()
        } else {
            Decimal::ZERO
        };
        position.margin -= margin_release;

        // New exposure consumes locked margin
        let margin_consumed = Self::consume_lock(lock, increase_qty.as_decimal());
        if margin_consumed > Decimal::ZERO {
            self.position_mut(order, timestamp).margin += margin_consumed;
        }

        let quote_balance = self.balance_mut(order.user_id, &quote);
        if margin_consumed > Decimal::ZERO {
            quote_balance.spend_locked(margin_consumed)?;
        }
        if margin_release > Decimal::ZERO {
            quote_balance.credit(margin_release)?;
        }
        if realized >= Decimal::ZERO {
            quote_balance.credit(realized)?;
        } else {
            // A loss beyond free balance is a liquidation concern, outside
            // this ledger; absorb what is available
            let loss = (-realized).min(quote_balance.free);
            quote_balance.spend_free(loss)?;
        }
        Ok(realized)
    }

    /// Consume `units × unit_cost` from the lock, capped at its remainder.
    fn consume_lock(lock: Option<&mut CostLock>, units: Decimal) -> Decimal {
        match lock {
            Some(lock) => {
                let release = (units * lock.unit_cost).min(lock.remaining);
                lock.remaining -= release;
                release
            }
            None => Decimal::ZERO,
        }
    }

    fn position_mut(&mut self, order: &Order, timestamp: i64) -> &mut Position {
        let key = (order.user_id, order.symbol.clone(), order.position_side);
        self.positions.entry(key).or_insert_with(|| {
            Position::new(
                order.user_id,
                order.symbol.clone(),
                order.position_side,
                order.leverage,
                order.margin_type,
                timestamp,
            )
        })
    }

    pub fn positions(&self, user: &UserId) -> Vec<Position> {
        let mut out: Vec<Position> = self
            .positions
            .iter()
            .filter(|((u, _, _), _)| u == user)
            .map(|(_, p)| p.clone())
            .collect();
        out.sort_by(|a, b| (a.symbol.as_str(), a.position_side as u8).cmp(&(b.symbol.as_str(), b.position_side as u8)));
        out
    }

    pub fn position_size(&self, user: &UserId, symbol: &Symbol, side: PositionSide) -> Decimal {
        self.positions
            .get(&(*user, symbol.clone(), side))
            .map_or(Decimal::ZERO, |p| p.size.as_decimal())
    }

    /// Re-mark every position on a symbol (mark-price feed hook).
    pub fn update_marks(&mut self, symbol: &Symbol, mark: Price, timestamp: i64) {
        for ((_, s, _), position) in self.positions.iter_mut() {
            if s == symbol {
                position.update_mark(mark, timestamp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::OrderId;
    use types::order::{NewOrder, OrderStatus, TradingMode};

    fn spot_buy(user: UserId, qty: u64, price: u64) -> Order {
        let intent = NewOrder::limit(
            user,
            Symbol::new("BTC/USDT"),
            Side::Buy,
            Quantity::from_u64(qty),
            Price::from_u64(price),
        );
        Order::admit(intent, OrderId::from_raw(1), OrderStatus::New, 0)
    }

    fn perp_order(user: UserId, side: Side, qty: u64, price: u64) -> Order {
        let mut intent = NewOrder::limit(
            user,
            Symbol::new("BTC/USDT"),
            side,
            Quantity::from_u64(qty),
            Price::from_u64(price),
        );
        intent.trading_mode = TradingMode::Perpetual;
        intent.leverage = Decimal::from(10);
        Order::admit(intent, OrderId::from_raw(1), OrderStatus::New, 0)
    }

    fn quote_lock(qty: u64, unit: u64) -> CostLock {
        CostLock {
            asset: "USDT".into(),
            unit_cost: Decimal::from(unit),
            remaining: Decimal::from(qty * unit),
        }
    }

    #[test]
    fn test_admission_lock_and_release_roundtrip() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "USDT", Decimal::from(100_000));

        let mut lock = quote_lock(1, 50_000);
        ledger.lock_admission(user, &lock).unwrap();
        assert_eq!(ledger.free(&user, "USDT"), Decimal::from(50_000));

        ledger.release_lock(user, &mut lock).unwrap();
        assert_eq!(ledger.free(&user, "USDT"), Decimal::from(100_000));
        assert_eq!(ledger.balance(&user, "USDT").unwrap().locked, Decimal::ZERO);
    }

    #[test]
    fn test_insufficient_funds_maps_to_engine_error() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "USDT", Decimal::from(10));
        let err = ledger.lock_admission(user, &quote_lock(1, 50_000)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_spot_buy_settlement_with_price_improvement() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "USDT", Decimal::from(100_000));

        let order = spot_buy(user, 1, 50_000);
        let mut lock = quote_lock(1, 50_000);
        ledger.lock_admission(user, &lock).unwrap();

        // Fills 100 under the locked budget; the difference is refunded
        ledger
            .settle_fill(
                &order,
                Some(&mut lock),
                Quantity::from_u64(1),
                Price::from_u64(49_900),
                Decimal::ZERO,
                "BTC",
                1,
            )
            .unwrap();

        let usdt = ledger.balance(&user, "USDT").unwrap();
        assert_eq!(usdt.free, Decimal::from(50_100));
        assert_eq!(usdt.locked, Decimal::ZERO);
        assert_eq!(ledger.free(&user, "BTC"), Decimal::ONE);
        assert_eq!(lock.remaining, Decimal::ZERO);
    }

    #[test]
    fn test_spot_sell_settlement_with_commission() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "BTC", Decimal::from(2));

        let mut intent = NewOrder::limit(
            user,
            Symbol::new("BTC/USDT"),
            Side::Sell,
            Quantity::from_u64(1),
            Price::from_u64(50_000),
        );
        intent.client_order_id = "s1".into();
        let order = Order::admit(intent, OrderId::from_raw(2), OrderStatus::New, 0);
        let mut lock = CostLock {
            asset: "BTC".into(),
            unit_cost: Decimal::ONE,
            remaining: Decimal::ONE,
        };
        ledger.lock_admission(user, &lock).unwrap();

        ledger
            .settle_fill(
                &order,
                Some(&mut lock),
                Quantity::from_u64(1),
                Price::from_u64(50_000),
                Decimal::from(25),
                "USDT",
                1,
            )
            .unwrap();

        assert_eq!(ledger.free(&user, "BTC"), Decimal::ONE);
        assert_eq!(ledger.free(&user, "USDT"), Decimal::from(49_975));
    }

    #[test]
    fn test_partial_fill_releases_proportionally() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "USDT", Decimal::from(1_000));

        let order = spot_buy(user, 10, 100);
        let mut lock = quote_lock(10, 100);
        ledger.lock_admission(user, &lock).unwrap();

        ledger
            .settle_fill(
                &order,
                Some(&mut lock),
                Quantity::from_u64(4),
                Price::from_u64(100),
                Decimal::ZERO,
                "BTC",
                1,
            )
            .unwrap();

        let usdt = ledger.balance(&user, "USDT").unwrap();
        assert_eq!(usdt.locked, Decimal::from(600));
        assert_eq!(lock.remaining, Decimal::from(600));

        // Cancel: the rest returns to free, exactly the prior state minus cost
        ledger.release_lock(user, &mut lock).unwrap();
        assert_eq!(ledger.free(&user, "USDT"), Decimal::from(600));
        assert_eq!(ledger.free(&user, "BTC"), Decimal::from(4));
    }

    #[test]
    fn test_derivative_open_and_close_with_pnl() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "USDT", Decimal::from(20_000));

        // Open long 1 @ 50000, 10x: locks 5000 margin
        let open = perp_order(user, Side::Buy, 1, 50_000);
        let mut lock = quote_lock(1, 5_000);
        ledger.lock_admission(user, &lock).unwrap();
        ledger
            .settle_fill(
                &open,
                Some(&mut lock),
                Quantity::from_u64(1),
                Price::from_u64(50_000),
                Decimal::ZERO,
                "USDT",
                1,
            )
            .unwrap();

        assert_eq!(ledger.free(&user, "USDT"), Decimal::from(15_000));
        let positions = ledger.positions(&user);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, Quantity::from_u64(1));
        assert_eq!(positions[0].margin, Decimal::from(5_000));

        // Close at 51000: margin returns, +1000 realized
        let close = perp_order(user, Side::Sell, 1, 51_000);
        let mut close_lock = quote_lock(1, 5_100);
        ledger.lock_admission(user, &close_lock).unwrap();
        let realized = ledger
            .settle_fill(
                &close,
                Some(&mut close_lock),
                Quantity::from_u64(1),
                Price::from_u64(51_000),
                Decimal::ZERO,
                "USDT",
                2,
            )
            .unwrap();
        ledger.release_lock(user, &mut close_lock).unwrap();

        assert_eq!(realized, Decimal::from(1_000));
        assert_eq!(ledger.free(&user, "USDT"), Decimal::from(21_000));
        let positions = ledger.positions(&user);
        assert!(positions[0].is_flat());
        assert_eq!(positions[0].margin, Decimal::ZERO);
        assert_eq!(positions[0].realized_pnl, Decimal::from(1_000));
    }

    #[test]
    fn test_mark_updates_touch_only_symbol() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "USDT", Decimal::from(100_000));

        let open = perp_order(user, Side::Buy, 1, 50_000);
        ledger
            .settle_fill(&open, None, Quantity::from_u64(1), Price::from_u64(50_000), Decimal::ZERO, "USDT", 1)
            .unwrap();

        ledger.update_marks(&Symbol::new("BTC/USDT"), Price::from_u64(52_000), 2);
        assert_eq!(ledger.positions(&user)[0].unrealized_pnl, Decimal::from(2_000));

        ledger.update_marks(&Symbol::new("ETH/USDT"), Price::from_u64(1), 3);
        assert_eq!(ledger.positions(&user)[0].unrealized_pnl, Decimal::from(2_000));
    }

    #[test]
    fn test_position_size_lookup() {
        let mut ledger = Ledger::new();
        let user = UserId::new();
        ledger.deposit(user, "USDT", Decimal::from(100_000));
        let open = perp_order(user, Side::Buy, 3, 100);
        ledger
            .settle_fill(&open, None, Quantity::from_u64(3), Price::from_u64(100), Decimal::ZERO, "USDT", 1)
            .unwrap();

        assert_eq!(
            ledger.position_size(&user, &Symbol::new("BTC/USDT"), PositionSide::Both),
            Decimal::from(3)
        );
        assert_eq!(
            ledger.position_size(&user, &Symbol::new("BTC/USDT"), PositionSide::Long),
            Decimal::ZERO
        );
    }
}
