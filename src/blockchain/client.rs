//! Blockchain client for the exchange and oracle contracts
//!
//! Constructed once at startup with the operator key and shared behind an
//! `Arc` by the settlement batcher and the resolution tracker.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::{ContractCall, ContractError};
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, TransactionReceipt, I256, U256, U64};
use tracing::{debug, info};

use super::contracts::{self, CTFExchangeContract, OptimisticOracleV2Contract};
use super::gateway::{ChainError, ExchangeGateway, OptimisticOracle, OracleRequestState, PriceQuery};
use super::types::{ContractAddresses, OnChainOrder, OrderFill, TxResult};

type SignerMiddleware = ethers::middleware::SignerMiddleware<Provider<Http>, LocalWallet>;

/// Blockchain client holding the operator signer
#[derive(Clone)]
pub struct BlockchainClient {
    signer: Arc<SignerMiddleware>,
    addresses: ContractAddresses,
    chain_id: u64,
    /// Reward offered with each oracle price request (collateral units)
    oracle_reward: U256,
}

impl BlockchainClient {
    /// Create a client that signs with the operator key
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        addresses: ContractAddresses,
        chain_id: u64,
    ) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Config(format!("invalid RPC url: {}", e)))?;
        let wallet: LocalWallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Config(format!("invalid operator key: {}", e)))?
            .with_chain_id(chain_id);
        let signer = SignerMiddleware::new(provider, wallet);

        info!(
            chain_id,
            operator = ?signer.address(),
            exchange = ?addresses.ctf_exchange,
            "Blockchain client initialized"
        );

        Ok(Self {
            signer: Arc::new(signer),
            addresses,
            chain_id,
            oracle_reward: U256::zero(),
        })
    }

    pub fn with_oracle_reward(mut self, reward: U256) -> Self {
        self.oracle_reward = reward;
        self
    }

    /// Get contract addresses
    pub fn addresses(&self) -> &ContractAddresses {
        &self.addresses
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Operator address; also the oracle requester
    pub fn operator(&self) -> Address {
        self.signer.address()
    }

    fn exchange(&self) -> CTFExchangeContract<SignerMiddleware> {
        CTFExchangeContract::new(self.addresses.ctf_exchange, self.signer.clone())
    }

    fn oracle(&self) -> OptimisticOracleV2Contract<SignerMiddleware> {
        OptimisticOracleV2Contract::new(self.addresses.optimistic_oracle, self.signer.clone())
    }

    /// Convert OnChainOrder to contract Order struct
    fn to_contract_order(order: &OnChainOrder, signature: &Bytes) -> contracts::Order {
        contracts::Order {
            salt: order.salt,
            maker: order.maker,
            signer: order.signer,
            taker: order.taker,
            token_id: order.token_id,
            maker_amount: order.maker_amount,
            taker_amount: order.taker_amount,
            expiration: order.expiration,
            nonce: order.nonce,
            fee_rate_bps: order.fee_rate_bps,
            side: order.side as u8,
            signature_type: order.signature_type as u8,
            signature: signature.clone(),
        }
    }

    /// Send a call and wait for its receipt. A mined-but-failed transaction
    /// is reported as a revert.
    async fn send_and_confirm<D: Detokenize>(call: ContractCall<SignerMiddleware, D>) -> Result<TxResult, ChainError> {
        let pending = call.send().await.map_err(classify_contract_error)?;
        let tx_hash = *pending;
        debug!(?tx_hash, "Transaction sent");

        let receipt = pending
            .await
            .map_err(|e| ChainError::from_message(e.to_string()))?
            .ok_or(ChainError::NoReceipt(tx_hash))?;

        parse_receipt(receipt)
    }
}

fn classify_contract_error(err: ContractError<SignerMiddleware>) -> ChainError {
    match err {
        ContractError::Revert(data) => ChainError::Reverted {
            tx_hash: None,
            reason: format!("0x{}", hex::encode(&data)),
        },
        other => ChainError::from_message(other.to_string()),
    }
}

/// Parse transaction receipt into TxResult
fn parse_receipt(receipt: TransactionReceipt) -> Result<TxResult, ChainError> {
    let tx_hash = receipt.transaction_hash;
    if receipt.status != Some(U64::from(1)) {
        return Err(ChainError::Reverted {
            tx_hash: Some(tx_hash),
            reason: "transaction status 0".to_string(),
        });
    }
    Ok(TxResult {
        tx_hash,
        block_number: receipt.block_number.map(|b| b.as_u64()),
        gas_used: receipt.gas_used,
    })
}

#[async_trait]
impl ExchangeGateway for BlockchainClient {
    async fn fill_order(
        &self,
        order: &OnChainOrder,
        signature: &Bytes,
        fill_amount: U256,
    ) -> Result<TxResult, ChainError> {
        let call = self
            .exchange()
            .fill_order(Self::to_contract_order(order, signature), fill_amount);
        Self::send_and_confirm(call).await
    }

    async fn fill_orders(&self, fills: &[OrderFill]) -> Result<TxResult, ChainError> {
        let orders = fills
            .iter()
            .map(|f| Self::to_contract_order(&f.order, &f.signature))
            .collect();
        let amounts = fills.iter().map(|f| f.fill_amount).collect();
        let call = self.exchange().fill_orders(orders, amounts);
        Self::send_and_confirm(call).await
    }
}

#[async_trait]
impl OptimisticOracle for BlockchainClient {
    async fn request_price(&self, query: &PriceQuery) -> Result<TxResult, ChainError> {
        let call = self.oracle().request_price(
            query.identifier,
            U256::from(query.timestamp),
            query.ancillary_data.clone(),
            self.addresses.collateral,
            self.oracle_reward,
        );
        Self::send_and_confirm(call).await
    }

    async fn has_price(&self, query: &PriceQuery) -> Result<bool, ChainError> {
        self.oracle()
            .has_price(
                self.operator(),
                query.identifier,
                U256::from(query.timestamp),
                query.ancillary_data.clone(),
            )
            .call()
            .await
            .map_err(classify_contract_error)
    }

    async fn get_state(&self, query: &PriceQuery) -> Result<OracleRequestState, ChainError> {
        let code = self
            .oracle()
            .get_state(
                self.operator(),
                query.identifier,
                U256::from(query.timestamp),
                query.ancillary_data.clone(),
            )
            .call()
            .await
            .map_err(classify_contract_error)?;

        OracleRequestState::from_u8(code)
            .ok_or_else(|| ChainError::Transient(format!("unknown oracle state {}", code)))
    }

    /// Settles the request on-chain if needed, then reads the price with a
    /// static `settleAndGetPrice` call from the requester.
    async fn get_price(&self, query: &PriceQuery) -> Result<I256, ChainError> {
        let state = self.get_state(query).await?;
        if !state.has_price() {
            return Err(ChainError::Transient(format!("price not available in state {:?}", state)));
        }

        if state != OracleRequestState::Settled {
            let call = self.oracle().settle(
                self.operator(),
                query.identifier,
                U256::from(query.timestamp),
                query.ancillary_data.clone(),
            );
            let tx = Self::send_and_confirm(call).await?;
            info!(tx_hash = ?tx.tx_hash, "Oracle request settled");
        }

        self.oracle()
            .settle_and_get_price(
                query.identifier,
                U256::from(query.timestamp),
                query.ancillary_data.clone(),
            )
            .call()
            .await
            .map_err(classify_contract_error)
    }
}
