//! 结算批次模型
//!
//! 一个批次对应一次链上提交: `pending → processing → completed | failed`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// 批次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// 结算批次记录
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SettlementBatch {
    /// 批次 ID (序列化为字符串)
    pub id: Uuid,

    /// 按提交顺序排列的成交 ID
    pub trade_ids: Vec<Uuid>,

    pub trade_count: i32,

    pub status: BatchStatus,

    /// 交易哈希 (0x 十六进制)
    pub tx_hash: Option<String>,

    pub block_number: Option<i64>,

    pub gas_used: Option<i64>,

    pub error_message: Option<String>,

    /// 提交层重试次数
    pub retry_count: i32,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SettlementBatch {
    /// 创建新的 pending 批次
    pub fn new(trade_ids: Vec<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trade_count: trade_ids.len() as i32,
            trade_ids,
            status: BatchStatus::Pending,
            tx_hash: None,
            block_number: None,
            gas_used: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            processed_at: None,
            completed_at: None,
        }
    }

    /// 仅保留实际认领到的成交
    pub fn with_trade_ids(mut self, trade_ids: Vec<Uuid>) -> Self {
        self.trade_count = trade_ids.len() as i32;
        self.trade_ids = trade_ids;
        self
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = BatchStatus::Processing;
        self.processed_at = Some(now);
    }

    /// 记录已确认的链上回执, 状态保持 processing
    pub fn record_receipt(&mut self, tx_hash: String, block_number: Option<i64>, gas_used: Option<i64>) {
        self.tx_hash = Some(tx_hash);
        self.block_number = block_number;
        self.gas_used = gas_used;
    }

    /// processing 状态下已有回执, 说明交易已上链
    pub fn has_receipt(&self) -> bool {
        self.status == BatchStatus::Processing && self.tx_hash.is_some()
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = BatchStatus::Completed;
        self.error_message = None;
        self.completed_at = Some(now);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, tx_hash: Option<String>, now: DateTime<Utc>) {
        self.status = BatchStatus::Failed;
        self.error_message = Some(error.into());
        if tx_hash.is_some() {
            self.tx_hash = tx_hash;
        }
        self.completed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_lifecycle() {
        let now = Utc::now();
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let mut batch = SettlementBatch::new(ids.clone(), now);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.trade_count, 2);

        batch = batch.with_trade_ids(vec![ids[1]]);
        assert_eq!(batch.trade_count, 1);

        batch.mark_processing(now);
        assert_eq!(batch.status, BatchStatus::Processing);
        assert!(!batch.status.is_terminal());
        assert!(!batch.has_receipt());

        batch.record_receipt("0xabc".to_string(), Some(10), Some(21000));
        assert!(batch.has_receipt());
        assert_eq!(batch.status, BatchStatus::Processing);

        batch.mark_completed(now);
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.block_number, Some(10));
        assert_eq!(batch.tx_hash.as_deref(), Some("0xabc"));
        assert!(batch.status.is_terminal());
        assert!(!batch.has_receipt());
    }
}
