//! 成交记录模型

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::market::ShareType;
use super::order::{Order, OrderSide};

/// 成交的链上结算状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "trade_settlement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TradeSettlementStatus {
    Unsettled,
    Settled,
}

/// 一次撮合产生的不可变成交
///
/// 成交价格始终为 maker 挂单价格
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub market_id: Uuid,
    pub share_type: ShareType,

    /// 成交价格 (maker 价格)
    pub price: Decimal,

    /// 成交份额
    pub amount: Decimal,

    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_address: String,
    pub taker_address: String,

    /// taker 的方向
    pub taker_side: OrderSide,

    pub settlement_status: TradeSettlementStatus,

    /// 当前所属的结算批次
    pub batch_id: Option<Uuid>,

    pub settlement_tx_hash: Option<String>,
    pub settlement_block: Option<i64>,
    pub settled_at: Option<DateTime<Utc>>,

    /// 结算失败后被释放的次数
    pub retry_count: i32,

    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// 从 taker 订单和一笔 maker 成交创建记录
    pub fn from_fill(
        taker: &Order,
        maker_order_id: Uuid,
        maker_address: &str,
        price: Decimal,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            market_id: taker.market_id,
            share_type: taker.share_type,
            price,
            amount,
            maker_order_id,
            taker_order_id: taker.id,
            maker_address: maker_address.to_string(),
            taker_address: taker.maker.clone(),
            taker_side: taker.side,
            settlement_status: TradeSettlementStatus::Unsettled,
            batch_id: None,
            settlement_tx_hash: None,
            settlement_block: None,
            settled_at: None,
            retry_count: 0,
            created_at: now,
        }
    }

    /// 是否可以被新批次认领
    pub fn is_claimable(&self) -> bool {
        self.settlement_status == TradeSettlementStatus::Unsettled && self.batch_id.is_none()
    }

    /// 成交金额 (抵押品)
    pub fn notional(&self) -> Decimal {
        self.price * self.amount
    }
}
