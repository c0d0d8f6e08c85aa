use std::time::Duration;

use ethers::types::{Address, U256};
use serde::Deserialize;

use crate::auth::EIP712Domain;
use crate::blockchain::ContractAddresses;
use crate::services::ingress::IngressConfig;
use crate::services::matching::MatchingConfig;
use crate::services::resolution::ResolutionConfig;
use crate::services::settlement::{SettlementConfig, SettlementTrigger};

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Absent: run against the in-memory repository
    #[serde(default)]
    pub database_url: Option<String>,

    // Blockchain settings
    #[serde(default)]
    pub rpc_url: Option<String>,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Operator key that relays settlements and oracle requests
    #[serde(default)]
    pub operator_private_key: Option<String>,

    #[serde(default = "default_zero_address")]
    pub exchange_address: String,

    #[serde(default = "default_collateral_address")]
    pub collateral_address: String,

    #[serde(default = "default_zero_address")]
    pub oracle_address: String,

    /// Reward attached to oracle price requests, collateral base units
    #[serde(default)]
    pub oracle_reward: u64,

    // Matching
    #[serde(default)]
    pub allow_self_trade: bool,

    #[serde(default = "default_expiry_sweep_interval")]
    pub expiry_sweep_interval_secs: u64,

    #[serde(default = "default_cancel_window")]
    pub cancel_window_secs: u64,

    // Settlement
    #[serde(default)]
    pub settlement_enabled: bool,

    #[serde(default = "default_settlement_trigger")]
    pub settlement_trigger: String,

    #[serde(default = "default_settlement_interval")]
    pub settlement_interval_secs: u64,

    #[serde(default = "default_settlement_trade_threshold")]
    pub settlement_trade_threshold: i64,

    #[serde(default = "default_settlement_max_batch_size")]
    pub settlement_max_batch_size: usize,

    #[serde(default = "default_settlement_max_batches_per_run")]
    pub settlement_max_batches_per_run: usize,

    #[serde(default = "default_settlement_max_retries")]
    pub settlement_max_retries: u32,

    #[serde(default = "default_settlement_retry_delay_ms")]
    pub settlement_retry_delay_ms: u64,

    #[serde(default = "default_settlement_submit_timeout")]
    pub settlement_submit_timeout_secs: u64,

    #[serde(default = "default_settlement_max_trade_attempts")]
    pub settlement_max_trade_attempts: i32,

    // Resolution
    #[serde(default = "default_resolution_poll_interval")]
    pub resolution_poll_interval_secs: u64,

    #[serde(default = "default_true")]
    pub resolution_auto_finalize: bool,

    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_chain_id() -> u64 {
    137 // Polygon
}

fn default_zero_address() -> String {
    ZERO_ADDRESS.to_string()
}

fn default_collateral_address() -> String {
    // USDC.e on Polygon
    "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174".to_string()
}

fn default_expiry_sweep_interval() -> u64 {
    5
}

fn default_cancel_window() -> u64 {
    300
}

fn default_settlement_trigger() -> String {
    "interval".to_string()
}

fn default_settlement_interval() -> u64 {
    10
}

fn default_settlement_trade_threshold() -> i64 {
    50
}

fn default_settlement_max_batch_size() -> usize {
    50
}

fn default_settlement_max_batches_per_run() -> usize {
    10
}

fn default_settlement_max_retries() -> u32 {
    3
}

fn default_settlement_retry_delay_ms() -> u64 {
    500
}

fn default_settlement_submit_timeout() -> u64 {
    30
}

fn default_settlement_max_trade_attempts() -> i32 {
    5
}

fn default_resolution_poll_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> anyhow::Result<Self> {
        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }

    /// RPC endpoint and operator key are both set
    pub fn has_chain_config(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.rpc_url) && set(&self.operator_private_key)
    }

    pub fn contract_addresses(&self) -> anyhow::Result<ContractAddresses> {
        Ok(ContractAddresses::parse(
            &self.collateral_address,
            &self.exchange_address,
            &self.oracle_address,
        )?)
    }

    pub fn oracle_reward(&self) -> U256 {
        U256::from(self.oracle_reward)
    }

    pub fn matching_config(&self) -> MatchingConfig {
        MatchingConfig {
            allow_self_trade: self.allow_self_trade,
            ..Default::default()
        }
    }

    pub fn settlement_config(&self) -> anyhow::Result<SettlementConfig> {
        let trigger: SettlementTrigger = self
            .settlement_trigger
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        Ok(SettlementConfig {
            enabled: self.settlement_enabled,
            trigger,
            interval: Duration::from_secs(self.settlement_interval_secs),
            trade_threshold: self.settlement_trade_threshold,
            max_batch_size: self.settlement_max_batch_size,
            max_batches_per_run: self.settlement_max_batches_per_run,
            max_retries: self.settlement_max_retries,
            retry_delay: Duration::from_millis(self.settlement_retry_delay_ms),
            submit_timeout: Duration::from_secs(self.settlement_submit_timeout_secs),
            max_trade_attempts: self.settlement_max_trade_attempts,
            collateral: self.contract_addresses()?.collateral,
        })
    }

    pub fn resolution_config(&self) -> ResolutionConfig {
        ResolutionConfig {
            poll_interval: Duration::from_secs(self.resolution_poll_interval_secs),
            auto_finalize: self.resolution_auto_finalize,
        }
    }

    /// Orders are signed against the exchange contract on this chain
    pub fn ingress_config(&self) -> anyhow::Result<IngressConfig> {
        let addresses = self.contract_addresses()?;
        if addresses.ctf_exchange == Address::zero() {
            tracing::warn!("EXCHANGE_ADDRESS not set; order signatures are checked against the zero address");
        }
        Ok(IngressConfig {
            domain: EIP712Domain::ctf_exchange(self.chain_id, addresses.ctf_exchange),
            collateral: addresses.collateral,
            cancel_window: Duration::from_secs(self.cancel_window_secs),
        })
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}
