//! Signed order ingress
//!
//! Verifies wallet signatures before anything reaches the matching engine.
//! Orders are signed as CTF Exchange `Order` structs (EIP-712), cancels as
//! `CancelOrder(address wallet,string orderId,uint256 timestamp)`.

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::eip712::{order_struct_hash, recover_signer};
use crate::auth::{CancelOrderMessage, EIP712Domain, SignatureError};
use crate::clock::Clock;
use crate::db::{RepoError, Repository};
use crate::models::{Order, OrderSide, OrderStatus, ShareType, TimeInForce};
use crate::services::matching::{CancelOutcome, MatchingEngine, MatchingError, SubmitResult};
use crate::services::settlement::onchain::{onchain_order, parse_condition_id};
use crate::services::settlement::{SettlementError, TokenIdCalculator};

// ============================================================================
// Request Types
// ============================================================================

/// A wallet-signed order (Polymarket format)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrderPayload {
    pub market_id: Uuid,
    pub share_type: ShareType,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,

    /// uint256, decimal string
    pub salt: String,
    pub maker: String,
    /// Defaults to `maker`
    #[serde(default)]
    pub signer: Option<String>,
    /// Unix seconds, 0 = never
    #[serde(default)]
    pub expiration: i64,
    #[serde(default)]
    pub nonce: i64,
    #[serde(default)]
    pub fee_rate_bps: i32,
    /// 0 = EOA, 1 = PolyProxy, 2 = PolyGnosisSafe
    #[serde(default)]
    pub signature_type: i16,

    pub signature: String,

    #[serde(default)]
    pub time_in_force: TimeInForce,
}

/// A wallet-signed cancel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub order_id: Uuid,
    pub wallet: String,
    /// Unix seconds at signing
    pub timestamp: u64,
    pub signature: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Market not found: {0}")]
    MarketNotFound(Uuid),

    #[error("Signature does not match {0:?}")]
    SignerMismatch(Address),

    #[error("Invalid signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("Cancel request timestamp outside the accepted window")]
    StaleCancel,

    #[error(transparent)]
    Matching(#[from] MatchingError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RepoError),
}

impl From<SettlementError> for IngressError {
    fn from(err: SettlementError) -> Self {
        IngressError::InvalidField {
            field: "order",
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub domain: EIP712Domain,
    /// Collateral the outcome token ids are derived from
    pub collateral: Address,
    /// Accepted clock skew for cancel timestamps, either direction
    pub cancel_window: Duration,
}

// ============================================================================
// Ingress
// ============================================================================

pub struct OrderIngress {
    engine: Arc<MatchingEngine>,
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    config: IngressConfig,
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, IngressError> {
    value.parse().map_err(|_| IngressError::InvalidField {
        field,
        reason: format!("not an address: {}", value),
    })
}

/// Lowercase 0x hex, the form addresses are stored in
fn normalize(address: Address) -> String {
    format!("{:?}", address)
}

impl OrderIngress {
    pub fn new(
        engine: Arc<MatchingEngine>,
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        config: IngressConfig,
    ) -> Self {
        Self {
            engine,
            repo,
            clock,
            config,
        }
    }

    /// Verify the EIP-712 signature and hand the order to the engine.
    ///
    /// The order id is derived from the signed hash, so replaying the same
    /// signed order is rejected as a duplicate.
    pub async fn submit_order(&self, payload: SignedOrderPayload) -> Result<SubmitResult, IngressError> {
        let maker = parse_address("maker", &payload.maker)?;
        let signer = match &payload.signer {
            Some(s) => parse_address("signer", s)?,
            None => maker,
        };
        if U256::from_dec_str(&payload.salt).is_err() {
            return Err(IngressError::InvalidField {
                field: "salt",
                reason: format!("not a uint256: {}", payload.salt),
            });
        }

        let market = self
            .repo
            .get_market(payload.market_id)
            .await?
            .ok_or(IngressError::MarketNotFound(payload.market_id))?;

        let now = self.clock.now();
        let mut order = Order {
            id: Uuid::nil(),
            maker: normalize(maker),
            signer: normalize(signer),
            market_id: payload.market_id,
            share_type: payload.share_type,
            side: payload.side,
            price: payload.price,
            amount: payload.amount,
            filled_amount: Decimal::ZERO,
            status: OrderStatus::Open,
            time_in_force: payload.time_in_force,
            salt: payload.salt,
            nonce: payload.nonce,
            expiration: payload.expiration,
            fee_rate_bps: payload.fee_rate_bps,
            signature_type: payload.signature_type,
            signature: payload.signature,
            created_at: now,
            updated_at: now,
        };

        let token_id = TokenIdCalculator::token_id(self.config.collateral, parse_condition_id(&market)?, order.share_type);
        let struct_hash = order_struct_hash(&onchain_order(&order, token_id)?);
        let recovered = recover_signer(&self.config.domain, struct_hash, &order.signature)?;
        if recovered != signer {
            warn!(maker = %order.maker, recovered = ?recovered, "Order signature mismatch");
            return Err(IngressError::SignerMismatch(signer));
        }

        let digest = self.config.domain.typed_data_hash(struct_hash);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest.as_bytes()[..16]);
        order.id = Uuid::from_bytes(id);

        debug!(order_id = %order.id, maker = %order.maker, "Signed order accepted");
        Ok(self.engine.submit(order).await?)
    }

    /// Verify a signed cancel from the order's maker and cancel it
    pub async fn cancel_order(&self, request: CancelRequest) -> Result<CancelOutcome, IngressError> {
        let wallet = parse_address("wallet", &request.wallet)?;

        let now = self.clock.now().timestamp();
        let window = self.config.cancel_window.as_secs() as i64;
        let signed_at = i64::try_from(request.timestamp).map_err(|_| IngressError::StaleCancel)?;
        if (now - signed_at).abs() > window {
            return Err(IngressError::StaleCancel);
        }

        let message = CancelOrderMessage {
            wallet,
            order_id: request.order_id.to_string(),
            timestamp: request.timestamp,
        };
        let recovered = recover_signer(&self.config.domain, message.struct_hash(), &request.signature)?;
        if recovered != wallet {
            return Err(IngressError::SignerMismatch(wallet));
        }

        Ok(self.engine.cancel(request.order_id, &normalize(wallet)).await?)
    }
}
