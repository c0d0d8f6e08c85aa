//! Chain-facing seams
//!
//! [`ExchangeGateway`] and [`OptimisticOracle`] are the only ways the core
//! talks to contracts. [`BlockchainClient`](super::BlockchainClient)
//! implements both; tests substitute in-memory fakes.

use async_trait::async_trait;
use ethers::types::{Bytes, H256, I256, U256};
use serde::{Deserialize, Serialize};

use super::types::{OnChainOrder, OrderFill, TxResult};

/// UMA identifier for yes/no questions, right-padded to 32 bytes
pub const YES_OR_NO_IDENTIFIER: [u8; 32] = *b"YES_OR_NO_QUERY\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("RPC call timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transient(String),

    #[error("Nonce conflict: {0}")]
    Nonce(String),

    #[error("Transaction reverted: {reason}")]
    Reverted { tx_hash: Option<H256>, reason: String },

    #[error("No receipt for transaction {0:?}")]
    NoReceipt(H256),

    #[error("Chain configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Submission-layer failures worth another attempt. Reverts and config
    /// problems fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Timeout | ChainError::Transient(_) | ChainError::Nonce(_) | ChainError::NoReceipt(_)
        )
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            ChainError::Reverted { tx_hash, .. } => *tx_hash,
            ChainError::NoReceipt(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Classify a provider/middleware error message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("revert") {
            ChainError::Reverted { tx_hash: None, reason: message }
        } else if lower.contains("nonce") || lower.contains("replacement transaction underpriced") {
            ChainError::Nonce(message)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ChainError::Timeout
        } else {
            ChainError::Transient(message)
        }
    }
}

/// Exchange contract entry points used for settlement
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Fill one signed maker order from the operator account
    async fn fill_order(
        &self,
        order: &OnChainOrder,
        signature: &Bytes,
        fill_amount: U256,
    ) -> Result<TxResult, ChainError>;

    /// Fill several maker orders in one transaction
    async fn fill_orders(&self, fills: &[OrderFill]) -> Result<TxResult, ChainError>;
}

/// Key of one oracle price request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub identifier: [u8; 32],
    /// Request timestamp, unix seconds
    pub timestamp: u64,
    pub ancillary_data: Bytes,
}

impl PriceQuery {
    pub fn yes_or_no(timestamp: u64, ancillary_data: impl Into<Bytes>) -> Self {
        Self {
            identifier: YES_OR_NO_IDENTIFIER,
            timestamp,
            ancillary_data: ancillary_data.into(),
        }
    }
}

/// `OptimisticOracleV2.State`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleRequestState {
    Invalid,
    Requested,
    Proposed,
    /// Liveness passed without dispute; price is available
    Expired,
    Disputed,
    Resolved,
    Settled,
}

impl OracleRequestState {
    pub fn from_u8(value: u8) -> Option<Self> {
        use OracleRequestState::*;
        Some(match value {
            0 => Invalid,
            1 => Requested,
            2 => Proposed,
            3 => Expired,
            4 => Disputed,
            5 => Resolved,
            6 => Settled,
            _ => return None,
        })
    }

    /// A final price can be read
    pub fn has_price(&self) -> bool {
        matches!(
            self,
            OracleRequestState::Expired | OracleRequestState::Resolved | OracleRequestState::Settled
        )
    }
}

/// Optimistic oracle used to resolve markets
#[async_trait]
pub trait OptimisticOracle: Send + Sync {
    async fn request_price(&self, query: &PriceQuery) -> Result<TxResult, ChainError>;

    async fn has_price(&self, query: &PriceQuery) -> Result<bool, ChainError>;

    async fn get_state(&self, query: &PriceQuery) -> Result<OracleRequestState, ChainError>;

    /// Final price (18 decimals). Only valid once `has_price` is true.
    async fn get_price(&self, query: &PriceQuery) -> Result<I256, ChainError>;
}
