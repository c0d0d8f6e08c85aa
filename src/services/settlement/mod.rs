//! On-Chain Settlement
//!
//! Turns matched trades into CTF Exchange fills. Polymarket-style flow:
//! 1. Users sign orders off-chain (EIP-712)
//! 2. The engine matches them and records trades
//! 3. The batcher claims unsettled trades and the operator relays the
//!    makers' signed orders to `fillOrder`/`fillOrders`
//! 4. The exchange moves outcome tokens and collateral

mod batcher;
pub mod onchain;
mod types;

pub use batcher::SettlementBatcher;
pub use onchain::to_onchain_order;
pub use types::*;
