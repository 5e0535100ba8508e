//! Engine configuration
//!
//! All tunables live here; tests override individual fields from
//! `EngineConfig::default()`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::fee::FeeSchedule;
use types::ids::{Symbol, UserId};

/// Per-user risk caps consulted by the pre-admission gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Cap on `quantity × price` of a single order, in quote units
    pub max_notional: Decimal,
    /// Cap on projected position magnitude after a worst-case fill
    pub max_position: Decimal,
    /// Cap on simultaneously open orders
    pub max_open_orders: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_notional: Decimal::from(10_000_000),
            max_position: Decimal::from(1_000_000),
            max_open_orders: 200,
        }
    }
}

/// Trading session boundaries, Unix nanos. ATO/ATC orders are admitted only
/// inside `auction_window` of the open/close; DAY orders expire at the
/// close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub open_time: i64,
    pub close_time: i64,
    pub auction_window: i64,
}

impl SessionConfig {
    pub fn in_open_window(&self, now: i64) -> bool {
        now >= self.open_time && now <= self.open_time.saturating_add(self.auction_window)
    }

    pub fn in_close_window(&self, now: i64) -> bool {
        now >= self.close_time.saturating_sub(self.auction_window) && now <= self.close_time
    }

    pub fn is_closed(&self, now: i64) -> bool {
        now >= self.close_time
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        // Continuous session: always open, auctions always admissible
        Self {
            open_time: 0,
            close_time: i64::MAX,
            auction_window: i64::MAX,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbols: Vec<Symbol>,
    /// Per-symbol order queue capacity
    pub order_queue_capacity: usize,
    /// Trade/event fan-out queue capacity
    pub event_queue_capacity: usize,
    pub default_limits: RiskLimits,
    pub user_limits: HashMap<UserId, RiskLimits>,
    pub fee_schedule: FeeSchedule,
    pub self_trade_prevention: bool,
    pub session: SessionConfig,
    /// Price levels retained in published book snapshots
    pub snapshot_depth: usize,
    /// Fan-out delivery attempts before dead-lettering
    pub fanout_max_attempts: u32,
    /// Base backoff between fan-out retries, doubled per attempt
    pub fanout_retry_backoff_ms: u64,
    /// Expiry sweeper cadence
    pub expiry_sweep_interval_ms: u64,
}

impl EngineConfig {
    pub fn limits_for(&self, user: &UserId) -> &RiskLimits {
        self.user_limits.get(user).unwrap_or(&self.default_limits)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            order_queue_capacity: 1 << 20,
            event_queue_capacity: 1 << 20,
            default_limits: RiskLimits::default(),
            user_limits: HashMap::new(),
            fee_schedule: FeeSchedule::default(),
            self_trade_prevention: true,
            session: SessionConfig::default(),
            snapshot_depth: 50,
            fanout_max_attempts: 3,
            fanout_retry_backoff_ms: 10,
            expiry_sweep_interval_ms: 100,
        }
    }
}
