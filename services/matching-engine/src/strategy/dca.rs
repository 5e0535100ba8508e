//! Dollar-cost-averaging strategy
//!
//! Buys a fixed notional at a fixed cadence with a deterministic per-seed
//! jitter on the cadence, so a fleet of DCA bots sharing an interval does
//! not land on the engine in the same tick.

use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use types::ids::{Symbol, UserId};
use types::market::MarketSnapshot;
use types::numeric::Quantity;
use types::order::NewOrder;
use types::order::Side;
use types::position::Position;

use crate::strategy::Strategy;

#[derive(Debug, Clone)]
pub struct DcaConfig {
    /// Quote notional bought per interval
    pub notional: Decimal,
    pub interval: Duration,
    /// Seed for the cadence jitter
    pub jitter_seed: u64,
}

pub struct DcaStrategy {
    symbol: Symbol,
    user: UserId,
    config: DcaConfig,
    jittered_interval: Duration,
    purchases: u64,
}

impl DcaStrategy {
    pub fn new(symbol: Symbol, user: UserId, config: DcaConfig) -> Self {
        // Jitter up to 10% of the interval, fixed per seed
        let mut rng = ChaCha8Rng::seed_from_u64(config.jitter_seed);
        let jitter_ms = if config.interval.as_millis() > 0 {
            rng.gen_range(0..=(config.interval.as_millis() as u64 / 10).max(1))
        } else {
            0
        };
        let jittered_interval = config.interval + Duration::from_millis(jitter_ms);
        Self {
            symbol,
            user,
            config,
            jittered_interval,
            purchases: 0,
        }
    }

    pub fn purchases(&self) -> u64 {
        self.purchases
    }
}

impl Strategy for DcaStrategy {
    fn name(&self) -> &str {
        "dca"
    }

    fn poll_interval(&self) -> Duration {
        self.jittered_interval
    }

    fn generate_orders(&mut self, market: &MarketSnapshot, _positions: &[Position]) -> Vec<NewOrder> {
        let Some(reference) = market.reference_price() else {
            return Vec::new();
        };
        let qty = (self.config.notional / reference.as_decimal()).round_dp(8);
        let Some(qty) = Quantity::try_new(qty).filter(|q| !q.is_zero()) else {
            return Vec::new();
        };

        self.purchases += 1;
        let mut order = NewOrder::market(self.user, self.symbol.clone(), Side::Buy, qty);
        order.client_order_id = format!("dca-{}", self.purchases);
        vec![order]
    }
}
