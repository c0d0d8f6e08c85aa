use ethers::abi::Token;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::blockchain::OnChainOrder;

/// EIP-712 Type Hashes
pub const ORDER_TYPEHASH: &str = "Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)";
pub const CANCEL_ORDER_TYPEHASH: &str = "CancelOrder(address wallet,string orderId,uint256 timestamp)";
const DOMAIN_TYPEHASH: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const EXCHANGE_DOMAIN_NAME: &str = "Polymarket CTF Exchange";
pub const EXCHANGE_DOMAIN_VERSION: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("Malformed signature: {0}")]
    Malformed(String),

    #[error("Signer recovery failed: {0}")]
    Recovery(String),
}

/// EIP-712 Domain
///
/// Built once from configuration and handed to whoever verifies signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EIP712Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl EIP712Domain {
    /// Domain of the CTF Exchange orders are signed against
    pub fn ctf_exchange(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: EXCHANGE_DOMAIN_NAME.to_string(),
            version: EXCHANGE_DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> H256 {
        // Address must be encoded as 32 bytes (left-padded with zeros)
        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPEHASH).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(self.chain_id.into()),
            Token::Address(self.verifying_contract),
        ]);

        H256::from(keccak256(&encoded))
    }

    /// keccak256("\x19\x01" || domainSeparator || structHash)
    pub fn typed_data_hash(&self, struct_hash: H256) -> H256 {
        let mut data = Vec::with_capacity(66);
        data.extend_from_slice(&[0x19, 0x01]);
        data.extend_from_slice(self.separator().as_bytes());
        data.extend_from_slice(struct_hash.as_bytes());
        H256::from(keccak256(&data))
    }
}

/// Struct hash of a CTF Exchange order. The signature field is not part of
/// the signed struct.
pub fn order_struct_hash(order: &OnChainOrder) -> H256 {
    let encoded = ethers::abi::encode(&[
        Token::FixedBytes(keccak256(ORDER_TYPEHASH.as_bytes()).to_vec()),
        Token::Uint(order.salt),
        Token::Address(order.maker),
        Token::Address(order.signer),
        Token::Address(order.taker),
        Token::Uint(order.token_id),
        Token::Uint(order.maker_amount),
        Token::Uint(order.taker_amount),
        Token::Uint(order.expiration),
        Token::Uint(order.nonce),
        Token::Uint(order.fee_rate_bps),
        Token::Uint(U256::from(order.side as u8)),
        Token::Uint(U256::from(order.signature_type as u8)),
    ]);

    H256::from(keccak256(&encoded))
}

/// Cancel Order message for EIP-712 signature verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderMessage {
    pub wallet: Address,
    pub order_id: String,
    pub timestamp: u64,
}

impl CancelOrderMessage {
    pub fn struct_hash(&self) -> H256 {
        let type_hash = keccak256(CANCEL_ORDER_TYPEHASH.as_bytes());

        let encoded = ethers::abi::encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::Address(self.wallet),
            Token::FixedBytes(keccak256(self.order_id.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.timestamp)),
        ]);

        H256::from(keccak256(&encoded))
    }
}

/// Recover the address that signed `struct_hash` under `domain`
pub fn recover_signer(domain: &EIP712Domain, struct_hash: H256, signature: &str) -> Result<Address, SignatureError> {
    let message_hash = domain.typed_data_hash(struct_hash);

    let sig = Signature::from_str(signature.trim_start_matches("0x"))
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    sig.recover(message_hash)
        .map_err(|e| SignatureError::Recovery(e.to_string()))
}

/// Verify any EIP-712 typed data signature
pub fn verify_typed_signature(
    domain: &EIP712Domain,
    struct_hash: H256,
    signature: &str,
    expected: Address,
) -> Result<bool, SignatureError> {
    Ok(recover_signer(domain, struct_hash, signature)? == expected)
}

/// Typed data for `eth_signTypedData_v4`, as a wallet would sign the order
pub fn order_typed_data(domain: &EIP712Domain, order: &OnChainOrder) -> serde_json::Value {
    serde_json::json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "Order": [
                { "name": "salt", "type": "uint256" },
                { "name": "maker", "type": "address" },
                { "name": "signer", "type": "address" },
                { "name": "taker", "type": "address" },
                { "name": "tokenId", "type": "uint256" },
                { "name": "makerAmount", "type": "uint256" },
                { "name": "takerAmount", "type": "uint256" },
                { "name": "expiration", "type": "uint256" },
                { "name": "nonce", "type": "uint256" },
                { "name": "feeRateBps", "type": "uint256" },
                { "name": "side", "type": "uint8" },
                { "name": "signatureType", "type": "uint8" }
            ]
        },
        "primaryType": "Order",
        "domain": {
            "name": domain.name,
            "version": domain.version,
            "chainId": domain.chain_id,
            "verifyingContract": format!("{:?}", domain.verifying_contract)
        },
        "message": {
            "salt": order.salt.to_string(),
            "maker": format!("{:?}", order.maker),
            "signer": format!("{:?}", order.signer),
            "taker": format!("{:?}", order.taker),
            "tokenId": order.token_id.to_string(),
            "makerAmount": order.maker_amount.to_string(),
            "takerAmount": order.taker_amount.to_string(),
            "expiration": order.expiration.to_string(),
            "nonce": order.nonce.to_string(),
            "feeRateBps": order.fee_rate_bps.to_string(),
            "side": order.side as u8,
            "signatureType": order.signature_type as u8
        }
    })
}
