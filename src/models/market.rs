//! 预测市场和解决状态模型
//!
//! 定义市场、份额类型以及由预言机驱动的解决状态机。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 份额类型
///
/// 二元市场的两个结果：Yes (outcome 0) 和 No (outcome 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "share_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ShareType {
    /// Yes 份额 - 预测事件会发生
    Yes,
    /// No 份额 - 预测事件不会发生
    No,
}

impl ShareType {
    /// 获取互补份额类型
    pub fn complement(&self) -> ShareType {
        match self {
            ShareType::Yes => ShareType::No,
            ShareType::No => ShareType::Yes,
        }
    }

    /// 结果索引 (Yes = 0, No = 1)
    pub fn outcome_index(&self) -> u8 {
        match self {
            ShareType::Yes => 0,
            ShareType::No => 1,
        }
    }

    /// 从结果索引构造
    pub fn from_outcome_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(ShareType::Yes),
            1 => Some(ShareType::No),
            _ => None,
        }
    }

    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareType::Yes => "yes",
            ShareType::No => "no",
        }
    }
}

impl std::fmt::Display for ShareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShareType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" => Ok(ShareType::Yes),
            "no" => Ok(ShareType::No),
            _ => Err(format!("Invalid share type: {}", s)),
        }
    }
}

/// 市场解决状态
///
/// `trading → resolution_requested → proposed ⇄ disputed → resolved → settled_on_chain`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "resolution_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    /// 可交易
    Trading,
    /// 已向预言机请求结果
    ResolutionRequested,
    /// 已有提议结果，挑战期进行中
    Proposed,
    /// 争议中
    Disputed,
    /// 结果已最终确定
    Resolved,
    /// 链上结算完成 (终态)
    SettledOnChain,
}

impl ResolutionState {
    /// 是否接受新订单
    pub fn is_trading(&self) -> bool {
        matches!(self, ResolutionState::Trading)
    }

    /// 结果是否已最终确定
    pub fn is_final(&self) -> bool {
        matches!(self, ResolutionState::Resolved | ResolutionState::SettledOnChain)
    }

    /// 检查状态转换是否合法
    ///
    /// 允许跳过中间状态 (例如轮询间隔内提议期已经结束)，但不允许回退，
    /// 唯一的例外是 disputed → proposed。
    pub fn can_transition_to(&self, next: ResolutionState) -> bool {
        use ResolutionState::*;
        match (self, next) {
            (Trading, ResolutionRequested) => true,
            (ResolutionRequested, Proposed | Disputed | Resolved) => true,
            (Proposed, Disputed | Resolved) => true,
            (Disputed, Proposed | Resolved) => true,
            (Resolved, SettledOnChain) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Trading => "trading",
            ResolutionState::ResolutionRequested => "resolution_requested",
            ResolutionState::Proposed => "proposed",
            ResolutionState::Disputed => "disputed",
            ResolutionState::Resolved => "resolved",
            ResolutionState::SettledOnChain => "settled_on_chain",
        }
    }
}

impl std::fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 预测市场
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Market {
    /// 市场唯一 ID
    pub id: Uuid,

    /// 市场问题
    pub question: String,

    /// 链上 conditionId (0x 前缀, 32 字节)
    pub condition_id: String,

    /// 预言机请求的附加数据 (UTF-8 文本)
    pub ancillary_data: String,

    /// 到达该时间后向预言机请求结果
    pub resolution_time: DateTime<Utc>,

    /// 解决状态
    pub state: ResolutionState,

    /// 预言机请求使用的时间戳 (unix 秒)
    pub request_timestamp: Option<i64>,

    /// 预言机返回的原始价格 (int256 十进制字符串)
    pub resolved_price: Option<String>,

    /// 各结果的赔付 [yes, no]
    pub payouts: Option<Vec<Decimal>>,

    /// 最近一次预言机交互错误
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Market {
    /// 创建一个处于交易状态的新市场
    pub fn new(
        question: impl Into<String>,
        condition_id: impl Into<String>,
        ancillary_data: impl Into<String>,
        resolution_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            condition_id: condition_id.into(),
            ancillary_data: ancillary_data.into(),
            resolution_time,
            state: ResolutionState::Trading,
            request_timestamp: None,
            resolved_price: None,
            payouts: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            settled_at: None,
        }
    }

    /// 获胜的份额类型 (仅在赔付为 [1,0] 或 [0,1] 时)
    pub fn winning_share(&self) -> Option<ShareType> {
        let payouts = self.payouts.as_ref()?;
        match payouts.as_slice() {
            [yes, no] if *yes == Decimal::ONE && no.is_zero() => Some(ShareType::Yes),
            [yes, no] if yes.is_zero() && *no == Decimal::ONE => Some(ShareType::No),
            _ => None,
        }
    }
}
