pub mod batch;
pub mod market;
pub mod order;
pub mod trade;

pub use batch::{BatchStatus, SettlementBatch};
pub use market::{Market, ResolutionState, ShareType};
pub use order::{Order, OrderSide, OrderStatus, TimeInForce};
pub use trade::{Trade, TradeSettlementStatus};
