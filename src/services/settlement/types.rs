//! Settlement types

use std::str::FromStr;
use std::time::Duration;

use ethers::types::{Address, H256, U256, U512};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blockchain::ChainError;
use crate::db::RepoError;
use crate::models::{BatchStatus, ShareType};

// ============================================================================
// Errors
// ============================================================================

/// Settlement service errors
///
/// Chain failures during submission are recorded on the batch instead of
/// being returned; these variants cover state and data problems.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Batch already completed: {0}")]
    AlreadyCompleted(Uuid),

    #[error("Batch already failed, form a new batch: {0}")]
    AlreadyFailed(Uuid),

    #[error("Batch is being processed: {0}")]
    InProgress(Uuid),

    #[error("Batch {0} was changed by another writer")]
    Conflict(Uuid),

    #[error("Trade not found: {0}")]
    TradeNotFound(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Market not found: {0}")]
    MarketNotFound(Uuid),

    #[error("Invalid order data: {0}")]
    InvalidOrderData(String),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RepoError),
}

// ============================================================================
// Configuration
// ============================================================================

/// What makes the background worker run a settlement pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementTrigger {
    /// Every `interval`
    Interval,
    /// When unsettled trades reach `trade_threshold`, checked every `interval`
    TradeCount,
    /// Only through explicit `run_once` calls
    Manual,
}

impl FromStr for SettlementTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interval" => Ok(SettlementTrigger::Interval),
            "trade_count" => Ok(SettlementTrigger::TradeCount),
            "manual" => Ok(SettlementTrigger::Manual),
            other => Err(format!("unknown settlement trigger: {}", other)),
        }
    }
}

/// Settlement configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Whether the background worker runs at all
    pub enabled: bool,
    pub trigger: SettlementTrigger,
    pub interval: Duration,
    pub trade_threshold: i64,
    /// Trades per batch
    pub max_batch_size: usize,
    /// Batches formed and submitted per run
    pub max_batches_per_run: usize,
    /// Retry attempts for transient submission errors
    pub max_retries: u32,
    /// First backoff delay, doubled after each retry
    pub retry_delay: Duration,
    /// Bound on one submission attempt, receipt included
    pub submit_timeout: Duration,
    /// Trades that failed this many batches are left for an operator
    pub max_trade_attempts: i32,
    /// Collateral token the outcome tokens are minted against
    pub collateral: Address,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger: SettlementTrigger::Interval,
            interval: Duration::from_secs(10),
            trade_threshold: 50,
            max_batch_size: 50,
            max_batches_per_run: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            submit_timeout: Duration::from_secs(30),
            max_trade_attempts: 5,
            collateral: Address::zero(),
        }
    }
}

impl SettlementConfig {
    /// Longest a live submission can keep a batch `processing`: every
    /// attempt timing out plus every backoff sleep, with one attempt spare.
    /// Recovery leaves younger batches alone.
    pub fn submission_window(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(2);
        let backoff = 2u32.saturating_pow(self.max_retries).saturating_sub(1);
        self.submit_timeout
            .saturating_mul(attempts)
            .saturating_add(self.retry_delay.saturating_mul(backoff))
    }
}

/// Counts from one settlement pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub trades_settled: usize,
}

impl RunSummary {
    pub fn record(&mut self, status: BatchStatus, trade_count: usize) {
        match status {
            BatchStatus::Completed => {
                self.batches_completed += 1;
                self.trades_settled += trade_count;
            }
            BatchStatus::Failed => self.batches_failed += 1,
            BatchStatus::Pending | BatchStatus::Processing => {}
        }
    }
}

// ============================================================================
// Token IDs
// ============================================================================

/// alt_bn128 field modulus used by the Conditional Tokens collection ids
const P: U256 = U256([
    0x3c20_8c16_d87c_fd47,
    0x9781_6a91_6871_ca8d,
    0xb850_45b6_8181_585d,
    0x3064_4e72_e131_a029,
]);
const B: u64 = 3;

/// Token ID calculation helper
///
/// Mirrors `CTHelpers` of the Conditional Tokens contract:
/// `tokenId = getPositionId(collateral, getCollectionId(0, conditionId, indexSet))`.
/// The collection id is the compressed x coordinate of a curve point hashed
/// from (conditionId, indexSet); with a zero parent no point addition occurs.
pub struct TokenIdCalculator;

impl TokenIdCalculator {
    /// For Yes outcome: indexSet = 1 (binary 01)
    /// For No outcome: indexSet = 2 (binary 10)
    pub fn index_set(share_type: ShareType) -> U256 {
        U256::one() << share_type.outcome_index()
    }

    pub fn collection_id(condition_id: H256, index_set: U256) -> H256 {
        let mut packed = [0u8; 64];
        packed[..32].copy_from_slice(condition_id.as_bytes());
        index_set.to_big_endian(&mut packed[32..]);

        let mut x = U256::from_big_endian(&keccak256(packed));
        let odd = x.bit(255);

        let (x, mut y) = loop {
            x = addmod(x, U256::one());
            let yy = addmod(mulmod(x, mulmod(x, x)), U256::from(B));
            let y = sqrt(yy);
            if mulmod(y, y) == yy {
                break (x, y);
            }
        };
        if odd != y.bit(0) {
            y = P - y;
        }

        let compressed = if y.bit(0) { x ^ (U256::one() << 254) } else { x };
        let mut out = [0u8; 32];
        compressed.to_big_endian(&mut out);
        H256::from(out)
    }

    /// ERC1155 position id: `uint(keccak256(collateral ‖ collectionId))`
    pub fn position_id(collateral: Address, collection_id: H256) -> U256 {
        let mut packed = [0u8; 52];
        packed[..20].copy_from_slice(collateral.as_bytes());
        packed[20..].copy_from_slice(collection_id.as_bytes());
        U256::from_big_endian(&keccak256(packed))
    }

    pub fn token_id(collateral: Address, condition_id: H256, share_type: ShareType) -> U256 {
        let collection = Self::collection_id(condition_id, Self::index_set(share_type));
        Self::position_id(collateral, collection)
    }
}

fn reduce(value: U512) -> U256 {
    let r = value % U512::from(P);
    U256([r.0[0], r.0[1], r.0[2], r.0[3]])
}

fn addmod(a: U256, b: U256) -> U256 {
    reduce(U512::from(a) + U512::from(b))
}

fn mulmod(a: U256, b: U256) -> U256 {
    reduce(a.full_mul(b))
}

/// Square root candidate `x^((P+1)/4)`; P ≡ 3 (mod 4)
fn sqrt(x: U256) -> U256 {
    let mut exponent = (P + U256::one()) >> 2;
    let mut base = reduce(U512::from(x));
    let mut result = U256::one();
    while !exponent.is_zero() {
        if exponent.bit(0) {
            result = mulmod(result, base);
        }
        base = mulmod(base, base);
        exponent >>= 1;
    }
    result
}
