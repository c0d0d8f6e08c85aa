//! Matching Engine Types
//!
//! Shared types for the per-outcome order books and the matching engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::db::RepoError;
use crate::models::{Order, OrderSide, OrderStatus, ShareType, Trade};

// ============================================================================
// Price Level
// ============================================================================

/// Price level with 8 decimal precision for exact comparison
/// For prediction markets, price is always between 0 and 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i64);

impl PriceLevel {
    /// Finest price increment an order may use
    pub const DECIMALS: u32 = 8;
    const SCALE: i64 = 100_000_000;

    /// Create a PriceLevel from a Decimal price
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = (price * Decimal::from(Self::SCALE)).trunc();
        let value = scaled.mantissa() / 10i128.pow(scaled.scale());
        PriceLevel(value as i64)
    }

    /// Convert back to Decimal
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(Self::SCALE)
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Book Key
// ============================================================================

/// Identifies one order book: a market and one of its outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookKey {
    pub market_id: Uuid,
    pub share_type: ShareType,
}

impl BookKey {
    pub fn new(market_id: Uuid, share_type: ShareType) -> Self {
        Self { market_id, share_type }
    }

    pub fn of(order: &Order) -> Self {
        Self::new(order.market_id, order.share_type)
    }
}

impl std::fmt::Display for BookKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.market_id, self.share_type)
    }
}

// ============================================================================
// Order Entry (in orderbook)
// ============================================================================

/// A resting order in the orderbook
#[derive(Debug, Clone)]
pub struct OrderEntry {
    /// Order ID
    pub id: Uuid,

    /// Maker wallet address
    pub maker: String,

    /// Probability price (0-1)
    pub price: Decimal,

    /// Remaining unfilled amount
    pub remaining_amount: Decimal,

    pub side: OrderSide,

    /// Unix seconds, 0 = never
    pub expiration: i64,
}

impl OrderEntry {
    pub fn from_order(order: &Order) -> Self {
        Self {
            id: order.id,
            maker: order.maker.clone(),
            price: order.price,
            remaining_amount: order.remaining_amount(),
            side: order.side,
            expiration: order.expiration,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration > 0 && self.expiration < now.timestamp()
    }
}

/// Top of one side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTop {
    pub price: Decimal,
    /// Aggregated remaining size at `price`
    pub size: Decimal,
}

// ============================================================================
// Match Plan
// ============================================================================

/// One maker fill computed by a book walk
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub maker_order_id: Uuid,
    pub maker_address: String,
    /// Maker's resting price
    pub price: Decimal,
    pub amount: Decimal,
}

/// Result of walking the book for a taker, computed without mutating it
#[derive(Debug, Clone, Default)]
pub struct MatchPlan {
    pub fills: Vec<Fill>,
    /// Expired resting orders found during the walk
    pub expired: Vec<Uuid>,
    pub taker_remaining: Decimal,
}

// ============================================================================
// Events
// ============================================================================

/// Top-of-book change for one (market, outcome)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDelta {
    pub market_id: Uuid,
    pub outcome: u8,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    /// Milliseconds
    pub timestamp: i64,
}

/// Trade event for broadcasting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub trade_id: Uuid,
    pub market_id: Uuid,
    pub price: Decimal,
    pub amount: Decimal,
    /// Milliseconds
    pub timestamp: i64,
}

impl From<&Trade> for TradeEvent {
    fn from(trade: &Trade) -> Self {
        Self {
            trade_id: trade.id,
            market_id: trade.market_id,
            price: trade.price,
            amount: trade.amount,
            timestamp: trade.created_at.timestamp_millis(),
        }
    }
}

// ============================================================================
// Engine results
// ============================================================================

/// Outcome of a submitted order
#[derive(Debug, Clone)]
pub struct SubmitResult {
    /// The taker order in its post-match state
    pub order: Order,
    pub trades: Vec<Trade>,
}

impl SubmitResult {
    pub fn status(&self) -> OrderStatus {
        self.order.status
    }
}

/// Outcome of a cancel request
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled,
    /// Already filled, cancelled or expired. Not an error.
    AlreadyTerminal(OrderStatus),
}

/// Records persisted atomically for one matched order
#[derive(Debug, Clone)]
pub struct MatchRecord {
    /// Taker order in its post-match state
    pub taker: Order,
    /// (maker order id, filled amount) in fill order
    pub maker_fills: Vec<(Uuid, Decimal)>,
    pub trades: Vec<Trade>,
    /// Resting orders found expired during the walk
    pub expired: Vec<Uuid>,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Allow an order to match a resting order from the same address
    pub allow_self_trade: bool,
    /// Broadcast channel capacity for trade and book events
    pub event_buffer: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            allow_self_trade: false,
            event_buffer: 10_000,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Matching engine errors
#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Order expired at {0}")]
    OrderExpired(i64),

    #[error("Self trade: maker {0} would match own resting order")]
    SelfTrade(String),

    #[error("Insufficient liquidity to fill order completely")]
    InsufficientLiquidity,

    #[error("Market not found: {0}")]
    MarketNotFound(Uuid),

    #[error("Market not active: {0}")]
    MarketNotActive(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Not the order owner: {0}")]
    NotOwner(Uuid),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RepoError),
}

impl MatchingError {
    /// Validation errors reject the order; everything else is infrastructure
    pub fn is_validation(&self) -> bool {
        !matches!(self, MatchingError::DatabaseError(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MatchingError::InvalidOrder(_) => "invalid_order",
            MatchingError::InvalidPrice(_) => "invalid_price",
            MatchingError::InvalidAmount(_) => "invalid_amount",
            MatchingError::OrderExpired(_) => "expired",
            MatchingError::SelfTrade(_) => "self_trade",
            MatchingError::InsufficientLiquidity => "insufficient_liquidity",
            MatchingError::MarketNotFound(_) => "market_not_found",
            MatchingError::MarketNotActive(_) => "market_not_active",
            MatchingError::OrderNotFound(_) => "order_not_found",
            MatchingError::NotOwner(_) => "not_owner",
            MatchingError::DuplicateOrder(_) => "duplicate",
            MatchingError::DatabaseError(_) => "database",
        }
    }
}
