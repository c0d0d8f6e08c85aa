//! Blockchain integration module for Polymarket prediction markets
//!
//! This module provides:
//! - Contract bindings for the CTF Exchange and UMA Optimistic Oracle V2
//! - The [`ExchangeGateway`] / [`OptimisticOracle`] seams the core calls through
//! - An ethers-backed [`BlockchainClient`] implementing both

pub mod client;
pub mod contracts;
pub mod gateway;
pub mod types;

pub use client::BlockchainClient;
pub use gateway::{ChainError, ExchangeGateway, OptimisticOracle, OracleRequestState, PriceQuery};
pub use types::{ContractAddresses, OnChainOrder, OrderFill, Side, SignatureType, TxResult};
