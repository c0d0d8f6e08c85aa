//! Matching, settlement and resolution core of a binary-outcome prediction
//! market exchange.
//!
//! - [`services::matching`]: per-book price-time matching of signed orders
//! - [`services::settlement`]: batching trades into CTF Exchange fills
//! - [`services::resolution`]: following markets through the optimistic oracle
//! - [`services::ingress`]: EIP-712 verification in front of the engine

pub mod auth;
pub mod blockchain;
pub mod clock;
pub mod config;
pub mod db;
pub mod metrics;
pub mod models;
pub mod services;
