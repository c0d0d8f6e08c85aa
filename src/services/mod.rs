//! Business logic services

pub mod ingress;
pub mod matching;
pub mod resolution;
pub mod settlement;
