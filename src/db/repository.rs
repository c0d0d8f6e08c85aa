//! Repository interface
//!
//! The order store is the single source of truth. Every method that touches
//! more than one row is atomic in each implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{BatchStatus, Market, Order, ResolutionState, SettlementBatch, ShareType, Trade};
use crate::services::matching::MatchRecord;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// A conditional write lost a race; nothing was applied
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Insert of a row whose id already exists
    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

#[async_trait]
pub trait Repository: Send + Sync {
    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Insert or overwrite an order
    async fn save_order(&self, order: &Order) -> Result<(), RepoError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError>;

    /// Open and partially filled orders of one book, oldest first
    async fn load_open_orders(&self, market_id: Uuid, share_type: ShareType) -> Result<Vec<Order>, RepoError>;

    /// Every (market, outcome) that has at least one open order
    async fn list_open_books(&self) -> Result<Vec<(Uuid, ShareType)>, RepoError>;

    /// Persist the taker, maker fill increments, trades and lazily expired
    /// makers as one unit. Fails with `Conflict` if a maker no longer has the
    /// remaining amount the fill assumes, and with `Duplicate` if the taker id
    /// is already stored.
    async fn record_match(&self, record: &MatchRecord) -> Result<(), RepoError>;

    /// Mark still-active orders expired; returns how many changed
    async fn expire_orders(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<u64, RepoError>;

    /// Cancel an active order. Returns false if it was already terminal.
    async fn cancel_order(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError>;

    // ------------------------------------------------------------------
    // Trades
    // ------------------------------------------------------------------

    async fn save_trade(&self, trade: &Trade) -> Result<(), RepoError>;

    /// Trades by id, in the order requested
    async fn get_trades(&self, ids: &[Uuid]) -> Result<Vec<Trade>, RepoError>;

    /// Unsettled trades with no active batch and fewer than
    /// `max_retry_count` failed attempts, oldest first
    async fn list_unsettled_trades(&self, limit: i64, max_retry_count: i32) -> Result<Vec<Trade>, RepoError>;

    /// Unsettled trades, optionally for one market
    async fn count_unsettled_trades(&self, market_id: Option<Uuid>) -> Result<i64, RepoError>;

    // ------------------------------------------------------------------
    // Settlement batches
    // ------------------------------------------------------------------

    /// Atomically claim the batch's trades and insert the batch.
    ///
    /// Only trades still unsettled and unclaimed are taken; the stored batch
    /// lists exactly those. Returns the claimed ids. When nothing could be
    /// claimed no batch is stored.
    async fn claim_trades_for_batch(&self, batch: &SettlementBatch) -> Result<Vec<Uuid>, RepoError>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<SettlementBatch>, RepoError>;

    /// Write batch fields only if the stored status still equals `expected`.
    /// Returns false when another writer moved the batch first.
    ///
    /// A `Completed` batch stamps its trades settled with its tx hash and
    /// block; a `Failed` batch releases its trades and bumps their retry
    /// count. Both happen in the same transaction as the status write.
    async fn update_batch(&self, batch: &SettlementBatch, expected: BatchStatus) -> Result<bool, RepoError>;

    async fn list_batches_by_status(&self, status: BatchStatus) -> Result<Vec<SettlementBatch>, RepoError>;

    // ------------------------------------------------------------------
    // Markets
    // ------------------------------------------------------------------

    async fn save_market(&self, market: &Market) -> Result<(), RepoError>;

    async fn get_market(&self, id: Uuid) -> Result<Option<Market>, RepoError>;

    /// Markets not yet `settled_on_chain`
    async fn list_unfinalized_markets(&self) -> Result<Vec<Market>, RepoError>;

    /// Write resolution fields only if the stored state still equals
    /// `expected`. Returns false when another writer got there first.
    async fn update_market_resolution_state(
        &self,
        market: &Market,
        expected: ResolutionState,
    ) -> Result<bool, RepoError>;
}
