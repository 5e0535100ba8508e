//! Matching engine process
//!
//! Standalone binary wiring the engine to in-memory store and bus
//! implementations, with a grid market-maker and a DCA bot on the strategy
//! host. Runs until ctrl-c, then drains and exits 0; unrecoverable init
//! failure exits 1.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info};

use matching_engine::bus::InMemoryBus;
use matching_engine::config::EngineConfig;
use matching_engine::engine::MatchingEngine;
use matching_engine::store::InMemoryStore;
use matching_engine::strategy::{DcaConfig, DcaStrategy, GridConfig, GridStrategy, StrategyHost};
use types::ids::{Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{NewOrder, Side};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(err) = run().await {
        error!(%err, "unrecoverable engine failure");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), anyhow::Error> {
    info!("starting matching engine");

    let config = EngineConfig {
        symbols: vec![Symbol::new("BTC/USDT"), Symbol::new("ETH/USDT")],
        ..EngineConfig::default()
    };

    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(InMemoryBus::default());
    let engine = Arc::new(MatchingEngine::start(
        config,
        store.clone(),
        store.clone(),
        bus.clone(),
    )?);

    // Demo users: a market maker running the grid, a DCA accumulator, and a
    // seed order pair to give the book a touch
    let maker = UserId::new();
    let accumulator = UserId::new();
    engine.deposit(maker, "USDT", Decimal::from(1_000_000));
    engine.deposit(maker, "BTC", Decimal::from(20));
    engine.deposit(accumulator, "USDT", Decimal::from(100_000));

    let btc = Symbol::new("BTC/USDT");
    engine
        .submit_order(NewOrder::limit(
            maker,
            btc.clone(),
            Side::Buy,
            Quantity::from_str("0.5")?,
            Price::from_u64(49_900),
        ))
        .await?;
    engine
        .submit_order(NewOrder::limit(
            maker,
            btc.clone(),
            Side::Sell,
            Quantity::from_str("0.5")?,
            Price::from_u64(50_100),
        ))
        .await?;

    let mut host = StrategyHost::new(engine.clone())
        .with_event_feeds(bus.subscribe_trades(), bus.subscribe_order_updates());
    host.register(
        btc.clone(),
        maker,
        Box::new(GridStrategy::new(
            btc.clone(),
            maker,
            GridConfig {
                lower: Price::from_u64(45_000),
                upper: Price::from_u64(55_000),
                levels: 20,
                qty_per_level: Quantity::from_str("0.05")?,
                poll_interval: Duration::from_secs(2),
            },
        )),
    );
    host.register(
        btc.clone(),
        accumulator,
        Box::new(DcaStrategy::new(
            btc.clone(),
            accumulator,
            DcaConfig {
                notional: Decimal::from(500),
                interval: Duration::from_secs(30),
                jitter_seed: 7,
            },
        )),
    );
    let host_handle = host.spawn();

    info!("engine running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    if let Ok(metrics) = serde_json::to_string(&engine.metrics()) {
        info!(%metrics, "engine metrics at shutdown");
    }
    host_handle.abort();
    let _ = host_handle.await;
    let engine = Arc::try_unwrap(engine)
        .map_err(|_| anyhow::anyhow!("engine still referenced at shutdown"))?;
    engine.shutdown().await?;

    info!(
        orders = store.order_count(),
        trades = store.trade_count(),
        "final store contents"
    );
    Ok(())
}
