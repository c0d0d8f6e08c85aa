//! Order Matching Engine Module for Prediction Markets
//!
//! Price-time priority matching for binary outcome tokens.
//!
//! # Architecture
//!
//! ```text
//! OrderIngress (signature checks)
//!   ↓
//! MatchingEngine
//!   ├→ Orderbook (per market:share_type, behind its own mutex)
//!   └→ Repository (record_match, one atomic write per order)
//! ```
//!
//! # Book Keys
//!
//! Each book is keyed by `{market_id}:{share_type}`, e.g.
//! `550e8400-e29b-41d4-a716-446655440000:yes`.

mod engine;
mod orderbook;
mod types;

pub use engine::MatchingEngine;
pub use orderbook::Orderbook;
pub use types::*;
