//! Order taxonomy and lifecycle state machine
//!
//! Carries the full order-type taxonomy of the venue. The simple types
//! (market, limit, the conditional family, iceberg, OCO, trailing stop) are
//! executed by the matching core; the advanced algorithmic categories are
//! accepted as labels whose child orders arrive through the strategy host.

use crate::ids::{OrderId, Symbol, UserId};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    Buy,
    /// Sell order (ask)
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type taxonomy.
///
/// The advanced algorithmic categories are carried on the order but their
/// scheduling is strategy policy; the engine executes the MARKET/LIMIT
/// children those strategies submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLimit,
    TakeProfit,
    TakeProfitLimit,
    /// Post-only limit: rejected rather than crossing the book
    LimitMaker,
    Iceberg,
    /// One-cancels-other leg; submitted in linked pairs
    Oco,
    TrailingStop,
    // Algorithmic categories, label-only at the core
    Twap,
    Vwap,
    ImplementationShortfall,
    ArrivalPrice,
    ParticipationRate,
    VolumeInline,
    TimeWeighted,
    Hidden,
    Reserve,
    Block,
    Sweep,
}

impl OrderType {
    /// Types that rest (or could rest) on the book at a limit price
    pub fn is_limit_like(&self) -> bool {
        matches!(
            self,
            OrderType::Limit | OrderType::LimitMaker | OrderType::Iceberg | OrderType::Oco
        )
    }

    /// Conditional types held off-book until a trigger price is crossed
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            OrderType::StopLoss
                | OrderType::StopLimit
                | OrderType::TakeProfit
                | OrderType::TakeProfitLimit
                | OrderType::TrailingStop
        )
    }

    /// Conditional types that require a caller-supplied stop price
    pub fn requires_stop_price(&self) -> bool {
        matches!(
            self,
            OrderType::StopLoss | OrderType::StopLimit | OrderType::TakeProfit | OrderType::TakeProfitLimit
        )
    }

    /// Types whose execution is scheduled by strategy code, not the core
    pub fn is_algorithmic(&self) -> bool {
        matches!(
            self,
            OrderType::Twap
                | OrderType::Vwap
                | OrderType::ImplementationShortfall
                | OrderType::ArrivalPrice
                | OrderType::ParticipationRate
                | OrderType::VolumeInline
                | OrderType::TimeWeighted
                | OrderType::Hidden
                | OrderType::Reserve
                | OrderType::Block
                | OrderType::Sweep
        )
    }

    /// Whether the limit-like price parameter is mandatory
    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            OrderType::Limit
                | OrderType::LimitMaker
                | OrderType::Iceberg
                | OrderType::Oco
                | OrderType::StopLimit
                | OrderType::TakeProfitLimit
        )
    }
}

/// Time-in-force policy governing how long an order may rest and whether
/// partial fills are acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-Till-Cancel: rests until filled or explicitly cancelled
    GTC,
    /// Immediate-Or-Cancel: match immediately, cancel remainder
    IOC,
    /// Fill-Or-Kill: full match or reject entirely
    FOK,
    /// Good-Till-Date: expires at `expire_time`
    GTD,
    /// At-The-Opening: admitted only inside the session open window
    ATO,
    /// At-The-Close: admitted only inside the session close window
    ATC,
    /// Good-Till-Crossing: post-only, rejected rather than crossing
    GTX,
    /// Day order: expires at session close
    DAY,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::GTC
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Admitted conditional order, held off-book until triggered
    PendingNew,
    /// Accepted and working
    New,
    PartiallyFilled,
    /// Completely executed (terminal)
    Filled,
    /// Cancelled by user or system (terminal)
    Cancelled,
    /// Cancel accepted, not yet applied by the matcher
    PendingCancel,
    /// Failed validation, risk, or post-only/FOK constraints (terminal)
    Rejected,
    /// Time-in-force deadline reached (terminal)
    Expired,
}

impl OrderStatus {
    /// Terminal states admit no further transitions or fills
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Open states are visible in open-order listings
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingNew
                | OrderStatus::New
                | OrderStatus::PartiallyFilled
                | OrderStatus::PendingCancel
        )
    }
}

/// Trading mode the order settles under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingMode {
    Spot,
    MarginCross,
    MarginIsolated,
    FuturesUsdM,
    FuturesCoinM,
    Perpetual,
}

impl TradingMode {
    /// Whether fills under this mode maintain a position row
    pub fn tracks_positions(&self) -> bool {
        !matches!(self, TradingMode::Spot)
    }

    /// Whether settlement transfers the base asset (cash market) or only
    /// margin and PnL in the quote asset (derivative market)
    pub fn is_cash_market(&self) -> bool {
        matches!(self, TradingMode::Spot | TradingMode::MarginCross | TradingMode::MarginIsolated)
    }
}

impl Default for TradingMode {
    fn default() -> Self {
        TradingMode::Spot
    }
}

/// Position side. LONG/SHORT are hedge-mode positions; BOTH is the single
/// netting position of one-way mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
    Both,
}

impl Default for PositionSide {
    fn default() -> Self {
        PositionSide::Both
    }
}

/// Margin type for derivative positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarginType {
    Cross,
    Isolated,
}

impl Default for MarginType {
    fn default() -> Self {
        MarginType::Cross
    }
}

/// Which price stream conditional triggers evaluate against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    LastPrice,
    MarkPrice,
}

impl Default for WorkingType {
    fn default() -> Self {
        WorkingType::LastPrice
    }
}

/// Client order intent: everything the engine needs to admit an order, minus
/// the engine-assigned identity and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub client_order_id: String,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub trailing_delta: Option<Decimal>,
    pub iceberg_display_qty: Option<Quantity>,
    pub time_in_force: TimeInForce,
    pub trading_mode: TradingMode,
    pub position_side: PositionSide,
    pub margin_type: MarginType,
    pub leverage: Decimal,
    pub reduce_only: bool,
    pub close_position: bool,
    /// Unix nanos; required for GTD
    pub expire_time: Option<i64>,
    /// Trailing callback as a fraction (0.01 = 1%)
    pub callback_rate: Option<Decimal>,
    pub working_type: WorkingType,
}

impl NewOrder {
    /// Limit order with defaults for everything else
    pub fn limit(user_id: UserId, symbol: Symbol, side: Side, quantity: Quantity, price: Price) -> Self {
        Self {
            client_order_id: String::new(),
            user_id,
            symbol,
            order_type: OrderType::Limit,
            side,
            quantity,
            price: Some(price),
            stop_price: None,
            trailing_delta: None,
            iceberg_display_qty: None,
            time_in_force: TimeInForce::GTC,
            trading_mode: TradingMode::Spot,
            position_side: PositionSide::Both,
            margin_type: MarginType::Cross,
            leverage: Decimal::ONE,
            reduce_only: false,
            close_position: false,
            expire_time: None,
            callback_rate: None,
            working_type: WorkingType::LastPrice,
        }
    }

    /// Market order with defaults for everything else
    pub fn market(user_id: UserId, symbol: Symbol, side: Side, quantity: Quantity) -> Self {
        Self {
            order_type: OrderType::Market,
            price: None,
            time_in_force: TimeInForce::IOC,
            ..Self::limit(user_id, symbol, side, quantity, Price::from_u64(1))
        }
    }
}

/// A live order: admitted intent plus engine-assigned identity and state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub client_order_id: String,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub trailing_delta: Option<Decimal>,
    pub iceberg_display_qty: Option<Quantity>,
    pub time_in_force: TimeInForce,
    pub trading_mode: TradingMode,
    pub position_side: PositionSide,
    pub margin_type: MarginType,
    pub leverage: Decimal,
    pub reduce_only: bool,
    pub close_position: bool,
    pub expire_time: Option<i64>,
    pub callback_rate: Option<Decimal>,
    pub working_type: WorkingType,

    pub status: OrderStatus,
    pub executed_qty: Quantity,
    /// Sum of `fill_qty × fill_price` over all fills; avg price is always
    /// derived from this total, never accumulated incrementally
    pub cumulative_quote_qty: Decimal,
    pub created_time: i64,
    pub updated_time: i64,
}

impl Order {
    /// Materialize an admitted order from a client intent.
    pub fn admit(intent: NewOrder, order_id: OrderId, status: OrderStatus, timestamp: i64) -> Self {
        Self {
            order_id,
            client_order_id: intent.client_order_id,
            user_id: intent.user_id,
            symbol: intent.symbol,
            order_type: intent.order_type,
            side: intent.side,
            quantity: intent.quantity,
            price: intent.price,
            stop_price: intent.stop_price,
            trailing_delta: intent.trailing_delta,
            iceberg_display_qty: intent.iceberg_display_qty,
            time_in_force: intent.time_in_force,
            trading_mode: intent.trading_mode,
            position_side: intent.position_side,
            margin_type: intent.margin_type,
            leverage: intent.leverage,
            reduce_only: intent.reduce_only,
            close_position: intent.close_position,
            expire_time: intent.expire_time,
            callback_rate: intent.callback_rate,
            working_type: intent.working_type,
            status,
            executed_qty: Quantity::zero(),
            cumulative_quote_qty: Decimal::ZERO,
            created_time: timestamp,
            updated_time: timestamp,
        }
    }

    pub fn remaining_qty(&self) -> Quantity {
        self.quantity - self.executed_qty
    }

    pub fn is_filled(&self) -> bool {
        self.executed_qty == self.quantity
    }

    pub fn has_fills(&self) -> bool {
        !self.executed_qty.is_zero()
    }

    /// Quantity-weighted mean price of all fills, None before the first fill.
    pub fn avg_price(&self) -> Option<Price> {
        if self.executed_qty.is_zero() {
            None
        } else {
            Price::try_new(self.cumulative_quote_qty / self.executed_qty.as_decimal())
        }
    }

    /// Record a fill and advance the status machine.
    ///
    /// # Panics
    /// Panics if the order is terminal or the fill exceeds remaining quantity.
    pub fn record_fill(&mut self, fill_qty: Quantity, fill_price: Price, timestamp: i64) {
        assert!(!self.status.is_terminal(), "fill on terminal order");
        let new_executed = self.executed_qty + fill_qty;
        assert!(
            new_executed.as_decimal() <= self.quantity.as_decimal(),
            "fill would exceed order quantity"
        );

        self.executed_qty = new_executed;
        self.cumulative_quote_qty += fill_qty * fill_price;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_time = timestamp;
    }

    /// Transition to a terminal or pending-cancel state.
    ///
    /// # Panics
    /// Panics when leaving a terminal state.
    pub fn transition(&mut self, status: OrderStatus, timestamp: i64) {
        assert!(!self.status.is_terminal(), "transition out of terminal state");
        self.status = status;
        self.updated_time = timestamp;
    }
}
