//! Resolution types

use std::time::Duration;

use ethers::types::I256;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::blockchain::ChainError;
use crate::db::RepoError;
use crate::models::ResolutionState;

/// Market resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Market not found: {0}")]
    MarketNotFound(Uuid),

    #[error("Invalid resolution transition: {from} -> {to}")]
    InvalidTransition { from: ResolutionState, to: ResolutionState },

    #[error("Oracle has no final price yet for market {0}")]
    NotReady(Uuid),

    #[error("Market {0} has no oracle request")]
    NotRequested(Uuid),

    #[error("Unexpected oracle price: {0}")]
    InvalidPrice(String),

    #[error("Market {market_id} still has {count} unsettled trades")]
    UnsettledTrades { market_id: Uuid, count: i64 },

    #[error("Market {0} was updated concurrently")]
    Conflict(Uuid),

    #[error("Oracle error: {0}")]
    Oracle(#[from] ChainError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RepoError),
}

/// Resolution tracker configuration
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    pub poll_interval: Duration,
    /// Move resolved markets to `settled_on_chain` once their trades settle
    pub auto_finalize: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            auto_finalize: true,
        }
    }
}

/// Map a `YES_OR_NO_QUERY` price (18 decimals) to [yes, no] payouts
///
/// 1e18 means YES, 0 means NO, 0.5e18 splits the collateral evenly.
pub fn payouts_for_price(price: I256) -> Result<Vec<Decimal>, ResolutionError> {
    let one = I256::exp10(18);
    let half = I256::exp10(17) * I256::from(5);

    if price == one {
        Ok(vec![Decimal::ONE, Decimal::ZERO])
    } else if price.is_zero() {
        Ok(vec![Decimal::ZERO, Decimal::ONE])
    } else if price == half {
        let half = Decimal::new(5, 1);
        Ok(vec![half, half])
    } else {
        Err(ResolutionError::InvalidPrice(price.to_string()))
    }
}
