//! 预测市场订单模型
//!
//! 已签名的限价单及其状态生命周期。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use super::market::ShareType;

/// 份额数量的最大小数位数 (与链上 6 位精度一致)
pub const AMOUNT_DECIMALS: u32 = 6;

/// 订单方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// 买入份额
    Buy,
    /// 卖出份额
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("Invalid order side: {}", s)),
        }
    }
}

/// 订单有效期类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "time_in_force", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good Till Cancel - 剩余部分挂单
    #[default]
    Gtc,
    /// Immediate or Cancel - 剩余部分取消
    Ioc,
    /// Fill or Kill - 必须立即全部成交
    Fok,
}

/// 订单状态
///
/// `open → partially_filled → filled`, `open → cancelled`, `open → expired`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// 挂单中
    Open,
    /// 部分成交
    PartiallyFilled,
    /// 完全成交
    Filled,
    /// 已取消
    Cancelled,
    /// 已过期
    Expired,
}

impl OrderStatus {
    /// 检查订单是否仍可成交
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    /// 终态订单不可再修改
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// 预测市场订单
///
/// 对链上 CTF Exchange `Order` 结构的签名意图
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    /// 订单唯一 ID
    pub id: Uuid,

    /// maker 钱包地址 (小写 0x 十六进制)
    pub maker: String,

    /// 签名者地址 (EOA 模式下等于 maker)
    pub signer: String,

    /// 市场 ID
    pub market_id: Uuid,

    /// 份额类型 (Yes/No)
    pub share_type: ShareType,

    /// 订单方向 (Buy/Sell)
    pub side: OrderSide,

    /// 限价 (0, 1)
    pub price: Decimal,

    /// 订单份额数量
    pub amount: Decimal,

    /// 已成交份额数量
    pub filled_amount: Decimal,

    /// 订单状态
    pub status: OrderStatus,

    pub time_in_force: TimeInForce,

    /// 随机盐 (uint256 十进制字符串)
    pub salt: String,

    pub nonce: i64,

    /// 过期时间 (unix 秒, 0 表示永不过期)
    pub expiration: i64,

    pub fee_rate_bps: i32,

    /// 链上签名类型 (0 = EOA, 1 = Proxy, 2 = Gnosis Safe)
    pub signature_type: i16,

    /// EIP-712 签名 (0x 十六进制)
    pub signature: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// 获取剩余未成交数量
    pub fn remaining_amount(&self) -> Decimal {
        self.amount - self.filled_amount
    }

    /// 检查订单在给定时间是否已过期
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration > 0 && self.expiration < now.timestamp()
    }

    /// 记录一次成交并更新状态
    ///
    /// 成交数量不能超过剩余数量
    pub fn apply_fill(&mut self, amount: Decimal, now: DateTime<Utc>) {
        debug_assert!(amount > Decimal::ZERO && amount <= self.remaining_amount());
        self.filled_amount += amount;
        self.status = if self.remaining_amount().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            maker: "0xabc".to_string(),
            signer: "0xabc".to_string(),
            market_id: Uuid::new_v4(),
            share_type: ShareType::Yes,
            side: OrderSide::Buy,
            price: dec!(0.60),
            amount: dec!(100),
            filled_amount: dec!(0),
            status: OrderStatus::Open,
            time_in_force: TimeInForce::Gtc,
            salt: "1".to_string(),
            nonce: 0,
            expiration: 0,
            fee_rate_bps: 0,
            signature_type: 0,
            signature: "0x".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_apply_fill_transitions() {
        let mut order = sample_order();
        let now = Utc::now();

        order.apply_fill(dec!(40), now);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_amount(), dec!(60));

        order.apply_fill(dec!(60), now);
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.status.is_terminal());
    }

    #[test]
    fn test_expiration() {
        let mut order = sample_order();
        let now = Utc::now();
        assert!(!order.is_expired_at(now));

        order.expiration = (now - Duration::seconds(10)).timestamp();
        assert!(order.is_expired_at(now));

        order.expiration = (now + Duration::seconds(10)).timestamp();
        assert!(!order.is_expired_at(now));
    }
}
