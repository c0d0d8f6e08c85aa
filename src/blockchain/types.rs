//! Blockchain types and structures

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

use super::gateway::ChainError;
use crate::models::OrderSide;

/// Order side as encoded on-chain (BUY = 0, SELL = 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl From<OrderSide> for Side {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Side::Buy,
            OrderSide::Sell => Side::Sell,
        }
    }
}

/// Signature type for order verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureType {
    EOA = 0,
    PolyProxy = 1,
    PolyGnosisSafe = 2,
}

impl SignatureType {
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(SignatureType::EOA),
            1 => Some(SignatureType::PolyProxy),
            2 => Some(SignatureType::PolyGnosisSafe),
            _ => None,
        }
    }
}

/// On-chain order structure matching CTFExchange.Order (without the signature)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainOrder {
    pub salt: U256,
    pub maker: Address,
    pub signer: Address,
    /// Zero address = public order
    pub taker: Address,
    pub token_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub expiration: U256,
    pub nonce: U256,
    pub fee_rate_bps: U256,
    pub side: Side,
    pub signature_type: SignatureType,
}

/// One maker order to fill, as passed to `fillOrder`/`fillOrders`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFill {
    pub order: OnChainOrder,
    pub signature: Bytes,
    /// In maker-amount units
    pub fill_amount: U256,
}

/// Confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

/// Contract addresses configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    /// Collateral ERC20 (USDC, 6 decimals)
    pub collateral: Address,
    pub ctf_exchange: Address,
    /// UMA Optimistic Oracle V2
    pub optimistic_oracle: Address,
}

impl ContractAddresses {
    pub fn parse(collateral: &str, ctf_exchange: &str, optimistic_oracle: &str) -> Result<Self, ChainError> {
        Ok(Self {
            collateral: parse_address("collateral", collateral)?,
            ctf_exchange: parse_address("exchange", ctf_exchange)?,
            optimistic_oracle: parse_address("oracle", optimistic_oracle)?,
        })
    }
}

fn parse_address(name: &str, value: &str) -> Result<Address, ChainError> {
    value
        .parse()
        .map_err(|_| ChainError::Config(format!("invalid {} address: {}", name, value)))
}
