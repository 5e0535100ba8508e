//! End-to-end engine scenarios
//!
//! Exercises the full submission → risk → matching → fan-out → derived
//! state pipeline against in-memory store and bus implementations.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::FromStr;
use rust_decimal::Decimal;

use matching_engine::bus::InMemoryBus;
use matching_engine::config::EngineConfig;
use matching_engine::engine::MatchingEngine;
use matching_engine::store::InMemoryStore;
use types::errors::EngineError;
use types::fee::FeeSchedule;
use types::ids::{Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{NewOrder, OrderStatus, OrderType, Side, TimeInForce, TradingMode};

struct Harness {
    engine: MatchingEngine,
    store: Arc<InMemoryStore>,
    bus: Arc<InMemoryBus>,
    symbol: Symbol,
}

fn free_fee_config(symbol: &str) -> EngineConfig {
    EngineConfig {
        symbols: vec![Symbol::new(symbol)],
        fee_schedule: FeeSchedule::free(),
        expiry_sweep_interval_ms: 10,
        ..EngineConfig::default()
    }
}

fn start(config: EngineConfig) -> Harness {
    let symbol = config.symbols[0].clone();
    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(InMemoryBus::default());
    let engine = MatchingEngine::start(config, store.clone(), store.clone(), bus.clone())
        .expect("engine start");
    Harness {
        engine,
        store,
        bus,
        symbol,
    }
}

fn funded_user(harness: &Harness, usdt: u64, btc: u64) -> UserId {
    let user = UserId::new();
    harness.engine.deposit(user, "USDT", Decimal::from(usdt));
    harness.engine.deposit(user, "BTC", Decimal::from(btc));
    user
}

fn qty(s: &str) -> Quantity {
    Quantity::from_str(s).unwrap()
}

fn price(s: &str) -> Price {
    Price::from_str(s).unwrap()
}

#[tokio::test]
async fn market_buy_sweeps_book_with_exact_average() {
    let harness = start(free_fee_config("BTC/USDT"));
    let maker = funded_user(&harness, 0, 1_000);
    let taker = funded_user(&harness, 10_000, 0);

    // Asks: 100 @ 10.00 then 50 @ 10.01
    harness
        .engine
        .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty("100"), price("10.00")))
        .await
        .unwrap();
    harness
        .engine
        .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty("50"), price("10.01")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let order_id = harness
        .engine
        .submit_order(NewOrder::market(taker, harness.symbol.clone(), Side::Buy, qty("120")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let order = harness.engine.get_order(order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.executed_qty, qty("120"));
    // avg = (100×10.00 + 20×10.01) / 120, exactly
    let expected_avg = Decimal::from_str("1200.2").unwrap() / Decimal::from(120);
    assert_eq!(order.avg_price().unwrap().as_decimal(), expected_avg);

    let trades = harness.store.trades();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].price, price("10.00"));
    assert_eq!(trades[0].quantity, qty("100"));
    assert_eq!(trades[1].price, price("10.01"));
    assert_eq!(trades[1].quantity, qty("20"));

    // 30 remains at 10.01
    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(book.asks, vec![(price("10.01"), qty("30"))]);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn limit_rests_then_partially_fills() {
    let harness = start(free_fee_config("BTC/USDT"));
    let buyer = funded_user(&harness, 1_000, 0);
    let seller = funded_user(&harness, 0, 100);

    let buy_id = harness
        .engine
        .submit_order(NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("10"), price("9.50")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(book.bids, vec![(price("9.50"), qty("10"))]);
    assert!(harness.store.trades().is_empty());

    let open = harness.engine.get_open_orders(&buyer, Some(&harness.symbol));
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].order_id, buy_id);

    let sell_id = harness
        .engine
        .submit_order(NewOrder::limit(seller, harness.symbol.clone(), Side::Sell, qty("4"), price("9.50")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let trades = harness.store.trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].quantity, qty("4"));
    assert_eq!(trades[0].price, price("9.50"));

    let buy = harness.engine.get_order(buy_id).unwrap();
    assert_eq!(buy.status, OrderStatus::PartiallyFilled);
    assert_eq!(buy.executed_qty, qty("4"));
    let sell = harness.engine.get_order(sell_id).unwrap();
    assert_eq!(sell.status, OrderStatus::Filled);

    // Partial fill keeps the remainder resting with its original priority
    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(book.bids, vec![(price("9.50"), qty("6"))]);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn fok_rejects_without_book_change() {
    let harness = start(free_fee_config("BTC/USDT"));
    let maker = funded_user(&harness, 0, 1_000);
    let taker = funded_user(&harness, 10_000, 0);

    harness
        .engine
        .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty("100"), price("10.00")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();
    let before = harness.engine.get_order_book(&harness.symbol).unwrap();

    let mut fok = NewOrder::limit(taker, harness.symbol.clone(), Side::Buy, qty("150"), price("10.00"));
    fok.time_in_force = TimeInForce::FOK;
    let fok_id = harness.engine.submit_order(fok).await.unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    assert_eq!(harness.engine.get_order(fok_id).unwrap().status, OrderStatus::Rejected);
    assert!(harness.store.trades().is_empty());
    let after = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(after.asks, before.asks);
    assert_eq!(after.bids, before.bids);

    // Rejection returned the locked funds
    let balance = harness.engine.get_balance(&taker, "USDT").unwrap();
    assert_eq!(balance.free, Decimal::from(10_000));
    assert_eq!(balance.locked, Decimal::ZERO);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn post_only_rejects_when_it_would_cross() {
    let harness = start(free_fee_config("BTC/USDT"));
    let maker = funded_user(&harness, 0, 1_000);
    let taker = funded_user(&harness, 10_000, 0);

    harness
        .engine
        .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty("1"), price("9.99")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let mut post_only = NewOrder::limit(taker, harness.symbol.clone(), Side::Buy, qty("1"), price("10.00"));
    post_only.order_type = OrderType::LimitMaker;
    let id = harness.engine.submit_order(post_only).await.unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    assert_eq!(harness.engine.get_order(id).unwrap().status, OrderStatus::Rejected);
    assert!(harness.store.trades().is_empty());
    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(book.asks, vec![(price("9.99"), qty("1"))]);
    assert!(book.bids.is_empty());

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn iceberg_replenishes_behind_newer_arrivals() {
    let harness = start(free_fee_config("BTC/USDT"));
    let iceberg_user = funded_user(&harness, 0, 1_000);
    let other_seller = funded_user(&harness, 0, 1_000);
    let buyer = funded_user(&harness, 10_000, 0);

    let mut iceberg = NewOrder::limit(
        iceberg_user,
        harness.symbol.clone(),
        Side::Sell,
        qty("100"),
        price("9.00"),
    );
    iceberg.order_type = OrderType::Iceberg;
    iceberg.iceberg_display_qty = Some(qty("10"));
    let iceberg_id = harness.engine.submit_order(iceberg).await.unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    // Only the display slice is visible
    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(book.asks, vec![(price("9.00"), qty("10"))]);

    // A later seller joins the same level
    let late_id = harness
        .engine
        .submit_order(NewOrder::limit(other_seller, harness.symbol.clone(), Side::Sell, qty("5"), price("9.00")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    // First buy consumes the visible slice; the next slice goes to the tail
    harness
        .engine
        .submit_order(NewOrder::market(buyer, harness.symbol.clone(), Side::Buy, qty("10")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(book.asks, vec![(price("9.00"), qty("15"))]);

    // The newcomer now has time priority over the replenished slice
    harness
        .engine
        .submit_order(NewOrder::market(buyer, harness.symbol.clone(), Side::Buy, qty("5")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let trades = harness.store.trades();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].maker_order_id, iceberg_id);
    assert_eq!(trades[1].maker_order_id, late_id);
    assert_eq!(trades[1].quantity, qty("5"));

    let iceberg_order = harness.engine.get_order(iceberg_id).unwrap();
    assert_eq!(iceberg_order.executed_qty, qty("10"));
    assert_eq!(iceberg_order.status, OrderStatus::PartiallyFilled);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn oco_fill_cancels_sibling_atomically() {
    let harness = start(free_fee_config("BTC/USDT"));
    let buyer = funded_user(&harness, 100_000, 0);
    let seller = funded_user(&harness, 0, 10);

    // Standing bid the limit leg will hit
    harness
        .engine
        .submit_order(NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("1"), price("11.00")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let limit_leg = NewOrder::limit(seller, harness.symbol.clone(), Side::Sell, qty("1"), price("11.00"));
    let mut stop_leg = NewOrder::limit(seller, harness.symbol.clone(), Side::Sell, qty("1"), price("9.00"));
    stop_leg.order_type = OrderType::StopLoss;
    stop_leg.price = None;
    stop_leg.stop_price = Some(price("9.00"));

    let (limit_id, stop_id) = harness.engine.submit_oco(limit_leg, stop_leg).await.unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    assert_eq!(harness.engine.get_order(limit_id).unwrap().status, OrderStatus::Filled);
    assert_eq!(harness.engine.get_order(stop_id).unwrap().status, OrderStatus::Cancelled);

    // The stop leg's lock was released with the cancel
    let btc = harness.engine.get_balance(&seller, "BTC").unwrap();
    assert_eq!(btc.locked, Decimal::ZERO);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn stop_loss_triggers_on_trade_and_executes() {
    let harness = start(free_fee_config("BTC/USDT"));
    let buyer = funded_user(&harness, 100_000, 0);
    let seller = funded_user(&harness, 0, 100);
    let stopper = funded_user(&harness, 0, 100);

    // Deep bid at 9.00
    harness
        .engine
        .submit_order(NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("10"), price("9.00")))
        .await
        .unwrap();

    let mut stop = NewOrder::limit(stopper, harness.symbol.clone(), Side::Sell, qty("2"), price("9.00"));
    stop.order_type = OrderType::StopLoss;
    stop.price = None;
    stop.stop_price = Some(price("9.00"));
    let stop_id = harness.engine.submit_order(stop).await.unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    // Held off-book while pending
    assert_eq!(harness.engine.get_order(stop_id).unwrap().status, OrderStatus::PendingNew);
    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert!(book.asks.is_empty());

    // A trade at 9.00 crosses the trigger from above
    harness
        .engine
        .submit_order(NewOrder::market(seller, harness.symbol.clone(), Side::Sell, qty("1")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let stop_order = harness.engine.get_order(stop_id).unwrap();
    assert_eq!(stop_order.status, OrderStatus::Filled);
    assert_eq!(stop_order.order_type, OrderType::Market);
    assert_eq!(stop_order.avg_price().unwrap(), price("9.00"));

    // 10 − 1 (market sell) − 2 (triggered stop) left on the bid
    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert_eq!(book.bids, vec![(price("9.00"), qty("7"))]);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn submit_then_cancel_restores_balance_exactly() {
    let harness = start(free_fee_config("BTC/USDT"));
    let buyer = funded_user(&harness, 1_000, 0);

    let order_id = harness
        .engine
        .submit_order(NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("10"), price("9.50")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let locked = harness.engine.get_balance(&buyer, "USDT").unwrap();
    assert_eq!(locked.free, Decimal::from(905));
    assert_eq!(locked.locked, Decimal::from(95));

    assert!(harness.engine.cancel_order(order_id).await.unwrap());
    harness.engine.flush(&harness.symbol).await.unwrap();

    let restored = harness.engine.get_balance(&buyer, "USDT").unwrap();
    assert_eq!(restored.free, Decimal::from(1_000));
    assert_eq!(restored.locked, Decimal::ZERO);
    assert_eq!(harness.engine.get_order(order_id).unwrap().status, OrderStatus::Cancelled);

    // Cancelling a terminal order is NOT_CANCELLABLE, repeatably
    for _ in 0..2 {
        let err = harness.engine.cancel_order(order_id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotCancellable { .. }));
    }
    let err = harness
        .engine
        .cancel_order(types::ids::OrderId::from_raw(999_999))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn trade_stream_update_ids_strictly_increase() {
    let harness = start(free_fee_config("BTC/USDT"));
    let maker = funded_user(&harness, 0, 1_000);
    let taker = funded_user(&harness, 100_000, 0);

    for (qty_str, px) in [("5", "10.00"), ("5", "10.01"), ("5", "10.02")] {
        harness
            .engine
            .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty(qty_str), price(px)))
            .await
            .unwrap();
    }
    harness.engine.flush(&harness.symbol).await.unwrap();
    harness
        .engine
        .submit_order(NewOrder::market(taker, harness.symbol.clone(), Side::Buy, qty("12")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let trade_events = harness.bus.trade_events();
    assert_eq!(trade_events.len(), 3);
    for window in trade_events.windows(2) {
        assert!(window[0].last_update_id < window[1].last_update_id);
    }
    // Trades are emitted in the order their takers were admitted, at
    // increasing book sequence
    let book = harness.engine.get_order_book(&harness.symbol).unwrap();
    assert!(book.last_update_id >= trade_events.last().unwrap().last_update_id);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn commissions_settle_in_the_received_asset() {
    let mut config = free_fee_config("BTC/USDT");
    config.fee_schedule = FeeSchedule::default(); // 2 bp maker, 5 bp taker
    let harness = start(config);
    let maker = funded_user(&harness, 0, 1);
    let taker = funded_user(&harness, 100_000, 0);

    harness
        .engine
        .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty("1"), price("50000")))
        .await
        .unwrap();
    harness
        .engine
        .submit_order(NewOrder::limit(taker, harness.symbol.clone(), Side::Buy, qty("1"), price("50000")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    // Buying taker received 1 BTC minus 0.05% commission
    let taker_btc = harness.engine.get_balance(&taker, "BTC").unwrap();
    assert_eq!(taker_btc.free, Decimal::from_str("0.9995").unwrap());
    // Selling maker received 50000 USDT minus 0.02% commission
    let maker_usdt = harness.engine.get_balance(&maker, "USDT").unwrap();
    assert_eq!(maker_usdt.free, Decimal::from(49_990));

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn self_trade_prevention_cancels_resting_order() {
    let harness = start(free_fee_config("BTC/USDT"));
    let user = funded_user(&harness, 100_000, 100);

    let resting_id = harness
        .engine
        .submit_order(NewOrder::limit(user, harness.symbol.clone(), Side::Sell, qty("1"), price("10.00")))
        .await
        .unwrap();
    let taker_id = harness
        .engine
        .submit_order(NewOrder::limit(user, harness.symbol.clone(), Side::Buy, qty("1"), price("10.00")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    assert!(harness.store.trades().is_empty());
    assert_eq!(harness.engine.get_order(resting_id).unwrap().status, OrderStatus::Cancelled);
    // The taker found no liquidity left and rests
    assert_eq!(harness.engine.get_order(taker_id).unwrap().status, OrderStatus::New);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn gtd_orders_expire_and_release_funds() {
    let harness = start(free_fee_config("BTC/USDT"));
    let buyer = funded_user(&harness, 1_000, 0);

    let mut gtd = NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("10"), price("9.50"));
    gtd.time_in_force = TimeInForce::GTD;
    gtd.expire_time = Some(matching_engine_test_now() + 50_000_000); // +50ms
    let order_id = harness.engine.submit_order(gtd).await.unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();
    assert_eq!(harness.engine.get_order(order_id).unwrap().status, OrderStatus::New);

    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.engine.flush(&harness.symbol).await.unwrap();

    assert_eq!(harness.engine.get_order(order_id).unwrap().status, OrderStatus::Expired);
    let balance = harness.engine.get_balance(&buyer, "USDT").unwrap();
    assert_eq!(balance.free, Decimal::from(1_000));
    assert_eq!(balance.locked, Decimal::ZERO);

    harness.engine.shutdown().await.unwrap();
}

fn matching_engine_test_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as i64
}

#[tokio::test]
async fn risk_caps_reject_before_matching() {
    let mut config = free_fee_config("BTC/USDT");
    config.default_limits.max_notional = Decimal::from(1_000);
    config.default_limits.max_open_orders = 2;
    let harness = start(config);
    let buyer = funded_user(&harness, 1_000_000, 0);

    // Notional cap
    let err = harness
        .engine
        .submit_order(NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("200"), price("10.00")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    // Open-order cap
    for _ in 0..2 {
        harness
            .engine
            .submit_order(NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("1"), price("10.00")))
            .await
            .unwrap();
    }
    let err = harness
        .engine
        .submit_order(NewOrder::limit(buyer, harness.symbol.clone(), Side::Buy, qty("1"), price("10.00")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    // Insufficient funds
    let pauper = UserId::new();
    let err = harness
        .engine
        .submit_order(NewOrder::limit(pauper, harness.symbol.clone(), Side::Buy, qty("1"), price("10.00")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn derivative_fills_build_and_close_positions() {
    let harness = start(free_fee_config("BTC/USDT"));
    let long_user = UserId::new();
    let short_user = UserId::new();
    harness.engine.deposit(long_user, "USDT", Decimal::from(20_000));
    harness.engine.deposit(short_user, "USDT", Decimal::from(20_000));

    let perp = |user: UserId, side: Side, q: &str, px: &str| {
        let mut order = NewOrder::limit(user, Symbol::new("BTC/USDT"), side, qty(q), price(px));
        order.trading_mode = TradingMode::Perpetual;
        order.leverage = Decimal::from(10);
        order
    };

    harness
        .engine
        .submit_order(perp(short_user, Side::Sell, "1", "50000"))
        .await
        .unwrap();
    harness
        .engine
        .submit_order(perp(long_user, Side::Buy, "1", "50000"))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let longs = harness.engine.get_positions(&long_user);
    assert_eq!(longs.len(), 1);
    assert_eq!(longs[0].size, qty("1"));
    assert_eq!(longs[0].entry_price.unwrap(), price("50000"));
    assert_eq!(longs[0].margin, Decimal::from(5_000));

    let shorts = harness.engine.get_positions(&short_user);
    assert_eq!(shorts[0].size, qty("1"));
    assert_eq!(shorts[0].exposure, Some(Side::Sell));

    // Long closes at 51000 against a new short seller
    harness
        .engine
        .submit_order(perp(short_user, Side::Buy, "1", "51000"))
        .await
        .unwrap();
    harness
        .engine
        .submit_order(perp(long_user, Side::Sell, "1", "51000"))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    let longs = harness.engine.get_positions(&long_user);
    assert!(longs[0].is_flat());
    assert_eq!(longs[0].realized_pnl, Decimal::from(1_000));
    // Margin back plus profit
    let usdt = harness.engine.get_balance(&long_user, "USDT").unwrap();
    assert_eq!(usdt.free, Decimal::from(21_000));
    assert_eq!(usdt.locked, Decimal::ZERO);

    harness.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn replaying_the_trade_stream_reconstructs_balances() {
    let harness = start(free_fee_config("BTC/USDT"));
    let maker = funded_user(&harness, 0, 1_000);
    let taker = funded_user(&harness, 100_000, 0);

    harness
        .engine
        .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty("3"), price("10.00")))
        .await
        .unwrap();
    harness
        .engine
        .submit_order(NewOrder::limit(maker, harness.symbol.clone(), Side::Sell, qty("2"), price("10.50")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();
    harness
        .engine
        .submit_order(NewOrder::market(taker, harness.symbol.clone(), Side::Buy, qty("4")))
        .await
        .unwrap();
    harness.engine.flush(&harness.symbol).await.unwrap();

    // Replay every stored trade into a fresh ledger from the same deposits
    let mut replay = matching_engine::ledger::Ledger::new();
    replay.deposit(maker, "BTC", Decimal::from(1_000));
    replay.deposit(taker, "USDT", Decimal::from(100_000));
    for trade in harness.store.trades() {
        let taker_order = harness.store.order(trade.taker_order_id).unwrap();
        let maker_order = harness.store.order(trade.maker_order_id).unwrap();
        replay
            .settle_fill(
                &maker_order,
                None,
                trade.quantity,
                trade.price,
                trade.maker_commission.amount,
                &trade.maker_commission.asset,
                trade.executed_at,
            )
            .unwrap();
        replay
            .settle_fill(
                &taker_order,
                None,
                trade.quantity,
                trade.price,
                trade.taker_commission.amount,
                &trade.taker_commission.asset,
                trade.executed_at,
            )
            .unwrap();
    }

    for (user, asset) in [(maker, "BTC"), (maker, "USDT"), (taker, "BTC"), (taker, "USDT")] {
        let live = harness.engine.get_balance(&user, asset).unwrap();
        let replayed = replay.balance(&user, asset).unwrap();
        assert_eq!(live.free + live.locked, replayed.free + replayed.locked, "{asset}");
    }

    harness.engine.shutdown().await.unwrap();
}
