//! Market resolution through the UMA Optimistic Oracle V2
//!
//! Markets request a `YES_OR_NO_QUERY` price once their resolution time
//! passes, follow the oracle through proposal and dispute, and record
//! payouts once the price is final.

mod tracker;
mod types;

pub use tracker::ResolutionTracker;
pub use types::*;
