//! In-memory repository
//!
//! Same contract as [`PgRepository`](super::PgRepository). A single mutex
//! over all tables makes every method atomic. Used by tests and by the
//! binary when no `DATABASE_URL` is configured.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::repository::{RepoError, Repository};
use crate::models::{
    BatchStatus, Market, Order, OrderStatus, ResolutionState, SettlementBatch, ShareType, Trade,
    TradeSettlementStatus,
};
use crate::services::matching::MatchRecord;

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    /// Insertion order of each order id, the tie-break for equal timestamps
    order_seq: HashMap<Uuid, u64>,
    next_seq: u64,
    trades: HashMap<Uuid, Trade>,
    batches: HashMap<Uuid, SettlementBatch>,
    markets: HashMap<Uuid, Market>,
}

impl Tables {
    fn stamp(&mut self, id: Uuid) {
        if let Entry::Vacant(slot) = self.order_seq.entry(id) {
            slot.insert(self.next_seq);
            self.next_seq += 1;
        }
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn oldest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| created_at(item));
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_order(&self, order: &Order) -> Result<(), RepoError> {
        let mut tables = self.tables.lock();
        tables.stamp(order.id);
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        Ok(self.tables.lock().orders.get(&id).cloned())
    }

    async fn load_open_orders(&self, market_id: Uuid, share_type: ShareType) -> Result<Vec<Order>, RepoError> {
        let tables = self.tables.lock();
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.market_id == market_id && o.share_type == share_type && o.status.is_active())
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, tables.order_seq.get(&o.id).copied().unwrap_or(u64::MAX)));
        Ok(orders)
    }

    async fn list_open_books(&self) -> Result<Vec<(Uuid, ShareType)>, RepoError> {
        let tables = self.tables.lock();
        let books: BTreeSet<(Uuid, ShareType)> = tables
            .orders
            .values()
            .filter(|o| o.status.is_active())
            .map(|o| (o.market_id, o.share_type))
            .collect();
        Ok(books.into_iter().collect())
    }

    async fn record_match(&self, record: &MatchRecord) -> Result<(), RepoError> {
        let mut tables = self.tables.lock();
        let now = record.taker.updated_at;

        // Validate the taker and every maker before touching anything
        if tables.orders.contains_key(&record.taker.id) {
            return Err(RepoError::Duplicate(format!("order {}", record.taker.id)));
        }
        for (maker_id, amount) in &record.maker_fills {
            let maker = tables
                .orders
                .get(maker_id)
                .ok_or_else(|| RepoError::NotFound(format!("maker order {}", maker_id)))?;
            if !maker.status.is_active() || maker.remaining_amount() < *amount {
                return Err(RepoError::Conflict(format!(
                    "maker order {} cannot absorb fill of {}",
                    maker_id, amount
                )));
            }
        }

        for (maker_id, amount) in &record.maker_fills {
            if let Some(maker) = tables.orders.get_mut(maker_id) {
                maker.apply_fill(*amount, now);
            }
        }
        for order_id in &record.expired {
            if let Some(order) = tables.orders.get_mut(order_id) {
                if order.status.is_active() {
                    order.status = OrderStatus::Expired;
                    order.updated_at = now;
                }
            }
        }
        for trade in &record.trades {
            tables.trades.insert(trade.id, trade.clone());
        }
        if let Entry::Vacant(slot) = tables.orders.entry(record.taker.id) {
            slot.insert(record.taker.clone());
            tables.stamp(record.taker.id);
        }
        Ok(())
    }

    async fn expire_orders(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<u64, RepoError> {
        let mut tables = self.tables.lock();
        let mut changed = 0;
        for id in ids {
            if let Some(order) = tables.orders.get_mut(id) {
                if order.status.is_active() {
                    order.status = OrderStatus::Expired;
                    order.updated_at = now;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn cancel_order(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError> {
        let mut tables = self.tables.lock();
        match tables.orders.get_mut(&id) {
            Some(order) if order.status.is_active() => {
                order.status = OrderStatus::Cancelled;
                order.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepoError::NotFound(format!("order {}", id))),
        }
    }

    async fn save_trade(&self, trade: &Trade) -> Result<(), RepoError> {
        self.tables.lock().trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn get_trades(&self, ids: &[Uuid]) -> Result<Vec<Trade>, RepoError> {
        let tables = self.tables.lock();
        Ok(ids.iter().filter_map(|id| tables.trades.get(id).cloned()).collect())
    }

    async fn list_unsettled_trades(&self, limit: i64, max_retry_count: i32) -> Result<Vec<Trade>, RepoError> {
        let tables = self.tables.lock();
        let mut trades: Vec<Trade> = tables
            .trades
            .values()
            .filter(|t| t.is_claimable() && t.retry_count < max_retry_count)
            .cloned()
            .collect();
        oldest_first(&mut trades, |t| t.created_at);
        trades.truncate(limit.max(0) as usize);
        Ok(trades)
    }

    async fn count_unsettled_trades(&self, market_id: Option<Uuid>) -> Result<i64, RepoError> {
        let tables = self.tables.lock();
        let count = tables
            .trades
            .values()
            .filter(|t| t.settlement_status == TradeSettlementStatus::Unsettled)
            .filter(|t| market_id.map_or(true, |m| t.market_id == m))
            .count();
        Ok(count as i64)
    }

    async fn claim_trades_for_batch(&self, batch: &SettlementBatch) -> Result<Vec<Uuid>, RepoError> {
        let mut tables = self.tables.lock();

        let mut claimed = Vec::with_capacity(batch.trade_ids.len());
        for id in &batch.trade_ids {
            if let Some(trade) = tables.trades.get_mut(id) {
                if trade.is_claimable() {
                    trade.batch_id = Some(batch.id);
                    claimed.push(*id);
                }
            }
        }

        if !claimed.is_empty() {
            let stored = batch.clone().with_trade_ids(claimed.clone());
            tables.batches.insert(stored.id, stored);
        }
        Ok(claimed)
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<SettlementBatch>, RepoError> {
        Ok(self.tables.lock().batches.get(&id).cloned())
    }

    async fn update_batch(&self, batch: &SettlementBatch, expected: BatchStatus) -> Result<bool, RepoError> {
        let mut tables = self.tables.lock();
        match tables.batches.get(&batch.id) {
            None => return Err(RepoError::NotFound(format!("batch {}", batch.id))),
            Some(stored) if stored.status != expected => return Ok(false),
            Some(_) => {}
        }

        for trade in tables.trades.values_mut().filter(|t| t.batch_id == Some(batch.id)) {
            match batch.status {
                BatchStatus::Completed => {
                    trade.settlement_status = TradeSettlementStatus::Settled;
                    trade.settlement_tx_hash = batch.tx_hash.clone();
                    trade.settlement_block = batch.block_number;
                    trade.settled_at = batch.completed_at;
                }
                BatchStatus::Failed => {
                    trade.batch_id = None;
                    trade.retry_count += 1;
                }
                BatchStatus::Pending | BatchStatus::Processing => {}
            }
        }

        tables.batches.insert(batch.id, batch.clone());
        Ok(true)
    }

    async fn list_batches_by_status(&self, status: BatchStatus) -> Result<Vec<SettlementBatch>, RepoError> {
        let tables = self.tables.lock();
        let mut batches: Vec<SettlementBatch> = tables
            .batches
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect();
        oldest_first(&mut batches, |b| b.created_at);
        Ok(batches)
    }

    async fn save_market(&self, market: &Market) -> Result<(), RepoError> {
        self.tables.lock().markets.insert(market.id, market.clone());
        Ok(())
    }

    async fn get_market(&self, id: Uuid) -> Result<Option<Market>, RepoError> {
        Ok(self.tables.lock().markets.get(&id).cloned())
    }

    async fn list_unfinalized_markets(&self) -> Result<Vec<Market>, RepoError> {
        let tables = self.tables.lock();
        let mut markets: Vec<Market> = tables
            .markets
            .values()
            .filter(|m| m.state != ResolutionState::SettledOnChain)
            .cloned()
            .collect();
        oldest_first(&mut markets, |m| m.created_at);
        Ok(markets)
    }

    async fn update_market_resolution_state(
        &self,
        market: &Market,
        expected: ResolutionState,
    ) -> Result<bool, RepoError> {
        let mut tables = self.tables.lock();
        match tables.markets.get_mut(&market.id) {
            Some(stored) if stored.state == expected => {
                *stored = market.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepoError::NotFound(format!("market {}", market.id))),
        }
    }
}
