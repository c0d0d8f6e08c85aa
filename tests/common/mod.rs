#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ethers::types::{Bytes, H256, I256, U256};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use polymarket_core::blockchain::{
    ChainError, ExchangeGateway, OnChainOrder, OptimisticOracle, OracleRequestState, OrderFill, PriceQuery, TxResult,
};
use polymarket_core::clock::ManualClock;
use polymarket_core::db::{MemoryRepository, RepoError, Repository};
use polymarket_core::models::{
    BatchStatus, Market, Order, OrderSide, OrderStatus, ResolutionState, SettlementBatch, ShareType, TimeInForce,
    Trade,
};
use polymarket_core::services::matching::{MatchRecord, MatchingConfig, MatchingEngine};

pub const ALICE: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
pub const BOB: &str = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc";

pub struct World {
    pub repo: Arc<MemoryRepository>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<MatchingEngine>,
    pub market: Market,
}

pub async fn world() -> World {
    build_world(false).await
}

/// Like [`world`], but the engine's store yields inside every
/// `record_match`, so concurrent submits interleave mid-match
pub async fn interleaved_world() -> World {
    build_world(true).await
}

async fn build_world(interleave: bool) -> World {
    let repo = Arc::new(MemoryRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let now = Utc::now();
    let market = Market::new(
        "Will the proposal pass?",
        format!("0x{}", "3e".repeat(32)),
        "q: Will the proposal pass?",
        now + Duration::hours(1),
        now,
    );
    repo.save_market(&market).await.unwrap();
    let store: Arc<dyn Repository> = if interleave {
        Arc::new(HookedRepository::interleaved(repo.clone()))
    } else {
        repo.clone()
    };
    let engine = Arc::new(MatchingEngine::new(store, clock.clone(), MatchingConfig::default()));
    World { repo, clock, engine, market }
}

pub fn order(market: &Market, maker: &str, side: OrderSide, price: Decimal, amount: Decimal) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        maker: maker.to_string(),
        signer: maker.to_string(),
        market_id: market.id,
        share_type: ShareType::Yes,
        side,
        price,
        amount,
        filled_amount: Decimal::ZERO,
        status: OrderStatus::Open,
        time_in_force: TimeInForce::Gtc,
        salt: "1001".to_string(),
        nonce: 0,
        expiration: 0,
        fee_rate_bps: 0,
        signature_type: 0,
        signature: format!("0x{}", "ab".repeat(65)),
        created_at: now,
        updated_at: now,
    }
}

/// Records every fill and confirms it, or fails with a queued error
#[derive(Default)]
pub struct RecordingGateway {
    pub fills: Mutex<Vec<OrderFill>>,
    pub failures: Mutex<Vec<ChainError>>,
}

impl RecordingGateway {
    fn settle(&self, fills: Vec<OrderFill>) -> Result<TxResult, ChainError> {
        if let Some(err) = self.failures.lock().pop() {
            return Err(err);
        }
        let mut recorded = self.fills.lock();
        recorded.extend(fills);
        Ok(TxResult {
            tx_hash: H256::from_low_u64_be(recorded.len() as u64),
            block_number: Some(500),
            gas_used: Some(U256::from(90_000u64)),
        })
    }
}

#[async_trait]
impl ExchangeGateway for RecordingGateway {
    async fn fill_order(&self, order: &OnChainOrder, signature: &Bytes, fill_amount: U256) -> Result<TxResult, ChainError> {
        self.settle(vec![OrderFill {
            order: order.clone(),
            signature: signature.clone(),
            fill_amount,
        }])
    }

    async fn fill_orders(&self, fills: &[OrderFill]) -> Result<TxResult, ChainError> {
        self.settle(fills.to_vec())
    }
}

/// Oracle whose state and price tests set directly
pub struct ScriptedOracle {
    pub state: Mutex<OracleRequestState>,
    pub price: Mutex<I256>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OracleRequestState::Invalid),
            price: Mutex::new(I256::zero()),
        }
    }
}

#[async_trait]
impl OptimisticOracle for ScriptedOracle {
    async fn request_price(&self, _: &PriceQuery) -> Result<TxResult, ChainError> {
        *self.state.lock() = OracleRequestState::Requested;
        Ok(TxResult { tx_hash: H256::repeat_byte(0xee), block_number: None, gas_used: None })
    }

    async fn has_price(&self, _: &PriceQuery) -> Result<bool, ChainError> {
        Ok(self.state.lock().has_price())
    }

    async fn get_state(&self, _: &PriceQuery) -> Result<OracleRequestState, ChainError> {
        Ok(*self.state.lock())
    }

    async fn get_price(&self, _: &PriceQuery) -> Result<I256, ChainError> {
        Ok(*self.price.lock())
    }
}

pub async fn stored(repo: &MemoryRepository, id: Uuid) -> Order {
    repo.get_order(id).await.unwrap().unwrap()
}

/// Memory store with hooks for concurrency and failure tests
pub struct HookedRepository {
    pub inner: Arc<MemoryRepository>,
    /// Yield to the scheduler before matches and batch reads
    interleave: bool,
    /// Reject any write that moves a batch to `completed`
    pub fail_completion: AtomicBool,
}

impl HookedRepository {
    pub fn new(inner: Arc<MemoryRepository>) -> Self {
        Self { inner, interleave: false, fail_completion: AtomicBool::new(false) }
    }

    pub fn interleaved(inner: Arc<MemoryRepository>) -> Self {
        Self { interleave: true, ..Self::new(inner) }
    }

    async fn pause(&self) {
        if self.interleave {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl Repository for HookedRepository {
    async fn save_order(&self, order: &Order) -> Result<(), RepoError> {
        self.inner.save_order(order).await
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        self.inner.get_order(id).await
    }

    async fn load_open_orders(&self, market_id: Uuid, share_type: ShareType) -> Result<Vec<Order>, RepoError> {
        self.inner.load_open_orders(market_id, share_type).await
    }

    async fn list_open_books(&self) -> Result<Vec<(Uuid, ShareType)>, RepoError> {
        self.inner.list_open_books().await
    }

    async fn record_match(&self, record: &MatchRecord) -> Result<(), RepoError> {
        self.pause().await;
        self.inner.record_match(record).await
    }

    async fn expire_orders(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<u64, RepoError> {
        self.inner.expire_orders(ids, now).await
    }

    async fn cancel_order(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError> {
        self.inner.cancel_order(id, now).await
    }

    async fn save_trade(&self, trade: &Trade) -> Result<(), RepoError> {
        self.inner.save_trade(trade).await
    }

    async fn get_trades(&self, ids: &[Uuid]) -> Result<Vec<Trade>, RepoError> {
        self.inner.get_trades(ids).await
    }

    async fn list_unsettled_trades(&self, limit: i64, max_retry_count: i32) -> Result<Vec<Trade>, RepoError> {
        self.inner.list_unsettled_trades(limit, max_retry_count).await
    }

    async fn count_unsettled_trades(&self, market_id: Option<Uuid>) -> Result<i64, RepoError> {
        self.inner.count_unsettled_trades(market_id).await
    }

    async fn claim_trades_for_batch(&self, batch: &SettlementBatch) -> Result<Vec<Uuid>, RepoError> {
        self.inner.claim_trades_for_batch(batch).await
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<SettlementBatch>, RepoError> {
        // After the read, so a concurrent caller acts on the same snapshot
        let batch = self.inner.get_batch(id).await;
        self.pause().await;
        batch
    }

    async fn update_batch(&self, batch: &SettlementBatch, expected: BatchStatus) -> Result<bool, RepoError> {
        if batch.status == BatchStatus::Completed && self.fail_completion.load(Ordering::SeqCst) {
            return Err(RepoError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.update_batch(batch, expected).await
    }

    async fn list_batches_by_status(&self, status: BatchStatus) -> Result<Vec<SettlementBatch>, RepoError> {
        self.inner.list_batches_by_status(status).await
    }

    async fn save_market(&self, market: &Market) -> Result<(), RepoError> {
        self.inner.save_market(market).await
    }

    async fn get_market(&self, id: Uuid) -> Result<Option<Market>, RepoError> {
        self.inner.get_market(id).await
    }

    async fn list_unfinalized_markets(&self) -> Result<Vec<Market>, RepoError> {
        self.inner.list_unfinalized_markets().await
    }

    async fn update_market_resolution_state(
        &self,
        market: &Market,
        expected: ResolutionState,
    ) -> Result<bool, RepoError> {
        self.inner.update_market_resolution_state(market, expected).await
    }
}
