//! Signature verification for orders and cancel requests

pub mod eip712;

pub use eip712::{CancelOrderMessage, EIP712Domain, SignatureError};
