//! Settlement Batcher
//!
//! Responsible for:
//! 1. Claiming unsettled trades into batches (atomic, so concurrent runs never overlap)
//! 2. Translating each trade into a `fillOrder` of the maker's signed order
//! 3. Submitting through [`ExchangeGateway`] with bounded retries
//! 4. Reconciling the outcome onto the batch and its trades
//!
//! A trade is only marked settled after a confirmed receipt. Every other
//! outcome releases the batch's trades for a later batch. Batch writes are
//! compare-and-set on the prior status, so two processes never both move
//! the same batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::onchain::to_onchain_order;
use super::types::*;
use crate::blockchain::{ChainError, ExchangeGateway, OrderFill, TxResult};
use crate::clock::Clock;
use crate::db::Repository;
use crate::metrics as m;
use crate::models::{BatchStatus, Market, Order, SettlementBatch};

/// Forms and submits settlement batches
pub struct SettlementBatcher {
    repo: Arc<dyn Repository>,
    gateway: Arc<dyn ExchangeGateway>,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
    /// Batches with a submission running in this process
    in_flight: DashSet<Uuid>,
}

impl SettlementBatcher {
    pub fn new(
        repo: Arc<dyn Repository>,
        gateway: Arc<dyn ExchangeGateway>,
        clock: Arc<dyn Clock>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            repo,
            gateway,
            clock,
            config,
            in_flight: DashSet::new(),
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Claim up to `max_trades` unsettled trades into a new pending batch.
    ///
    /// Returns `None` when nothing is left to settle, including when a
    /// concurrent run claimed every candidate first.
    pub async fn form_batch(&self, max_trades: usize) -> Result<Option<SettlementBatch>, SettlementError> {
        let candidates = self
            .repo
            .list_unsettled_trades(max_trades as i64, self.config.max_trade_attempts)
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let ids: Vec<Uuid> = candidates.iter().map(|t| t.id).collect();
        let batch = SettlementBatch::new(ids, self.clock.now());
        let claimed = self.repo.claim_trades_for_batch(&batch).await?;
        if claimed.is_empty() {
            debug!("All candidate trades were claimed by another run");
            return Ok(None);
        }

        let batch = batch.with_trade_ids(claimed);
        metrics::counter!(m::BATCHES_FORMED).increment(1);
        info!(batch_id = %batch.id, trade_count = batch.trade_count, "Settlement batch formed");
        Ok(Some(batch))
    }

    /// Submit a pending batch and record the outcome.
    ///
    /// Chain failures are not returned as errors: they end in a `failed`
    /// batch whose trades are released. Resubmitting a batch that already
    /// reached a terminal state is refused and sends nothing.
    pub async fn submit(&self, batch_id: Uuid) -> Result<SettlementBatch, SettlementError> {
        if !self.in_flight.insert(batch_id) {
            return Err(SettlementError::InProgress(batch_id));
        }
        let result = self.submit_inner(batch_id).await;
        self.in_flight.remove(&batch_id);
        result
    }

    async fn submit_inner(&self, batch_id: Uuid) -> Result<SettlementBatch, SettlementError> {
        let mut batch = self
            .repo
            .get_batch(batch_id)
            .await?
            .ok_or(SettlementError::BatchNotFound(batch_id))?;
        ensure_pending(&batch)?;

        batch.mark_processing(self.clock.now());
        if !self.repo.update_batch(&batch, BatchStatus::Pending).await? {
            // Another process claimed it between our read and write
            let current = self.repo.get_batch(batch_id).await?.ok_or(SettlementError::BatchNotFound(batch_id))?;
            ensure_pending(&current)?;
            return Err(SettlementError::Conflict(batch_id));
        }

        let fills = match self.build_fills(&batch).await {
            Ok(fills) => fills,
            Err(e) => {
                error!(batch_id = %batch.id, error = %e, "Cannot build on-chain orders for batch");
                batch.mark_failed(e.to_string(), None, self.clock.now());
                self.write(&batch, BatchStatus::Processing).await?;
                metrics::counter!(m::BATCHES_FAILED, "reason" => "invalid_order").increment(1);
                return Ok(batch);
            }
        };

        let started = Instant::now();
        let (outcome, attempts) = self.submit_with_retry(&fills).await;
        metrics::histogram!(m::SETTLEMENT_LATENCY).record(started.elapsed().as_secs_f64());
        batch.retry_count = attempts.saturating_sub(1) as i32;

        match outcome {
            Ok(tx) => {
                let block = tx.block_number.and_then(|b| i64::try_from(b).ok());
                let gas = tx
                    .gas_used
                    .and_then(|g| u64::try_from(g).ok())
                    .and_then(|g| i64::try_from(g).ok());
                batch.record_receipt(format!("{:?}", tx.tx_hash), block, gas);

                // Receipt first: a batch left processing with a tx hash is
                // completed by recovery instead of being released
                if let Err(e) = self.write(&batch, BatchStatus::Processing).await {
                    error!(batch_id = %batch.id, tx_hash = ?tx.tx_hash, error = %e, "Settlement confirmed on-chain but the receipt was not recorded");
                    return Err(e);
                }
                batch.mark_completed(self.clock.now());
                if let Err(e) = self.write(&batch, BatchStatus::Processing).await {
                    error!(batch_id = %batch.id, tx_hash = ?tx.tx_hash, error = %e, "Settlement confirmed on-chain but the batch was not completed");
                    return Err(e);
                }

                metrics::counter!(m::BATCHES_COMPLETED).increment(1);
                info!(
                    batch_id = %batch.id,
                    tx_hash = ?tx.tx_hash,
                    block = ?tx.block_number,
                    trade_count = batch.trade_count,
                    "Settlement batch confirmed"
                );
            }
            Err(e) => {
                let reason = if e.is_retryable() { "submission" } else { "reverted" };
                if e.is_retryable() {
                    warn!(batch_id = %batch.id, attempts, error = %e, "Settlement batch failed after retries");
                } else {
                    error!(batch_id = %batch.id, tx_hash = ?e.tx_hash(), error = %e, "Settlement batch reverted");
                }
                batch.mark_failed(e.to_string(), e.tx_hash().map(|h| format!("{:?}", h)), self.clock.now());
                self.write(&batch, BatchStatus::Processing).await?;
                metrics::counter!(m::BATCHES_FAILED, "reason" => reason).increment(1);
            }
        }

        Ok(batch)
    }

    /// Compare-and-set write; losing the race is an error for the caller
    async fn write(&self, batch: &SettlementBatch, expected: BatchStatus) -> Result<(), SettlementError> {
        if self.repo.update_batch(batch, expected).await? {
            Ok(())
        } else {
            Err(SettlementError::Conflict(batch.id))
        }
    }

    async fn build_fills(&self, batch: &SettlementBatch) -> Result<Vec<OrderFill>, SettlementError> {
        let trades = self.repo.get_trades(&batch.trade_ids).await?;
        if trades.len() != batch.trade_ids.len() {
            let missing = batch
                .trade_ids
                .iter()
                .find(|id| !trades.iter().any(|t| t.id == **id))
                .copied()
                .unwrap_or(batch.id);
            return Err(SettlementError::TradeNotFound(missing));
        }

        let mut orders: HashMap<Uuid, Order> = HashMap::new();
        let mut markets: HashMap<Uuid, Market> = HashMap::new();
        let mut fills = Vec::with_capacity(trades.len());

        for trade in &trades {
            if !orders.contains_key(&trade.maker_order_id) {
                let order = self
                    .repo
                    .get_order(trade.maker_order_id)
                    .await?
                    .ok_or(SettlementError::OrderNotFound(trade.maker_order_id))?;
                orders.insert(order.id, order);
            }
            if !markets.contains_key(&trade.market_id) {
                let market = self
                    .repo
                    .get_market(trade.market_id)
                    .await?
                    .ok_or(SettlementError::MarketNotFound(trade.market_id))?;
                markets.insert(market.id, market);
            }

            let (Some(order), Some(market)) = (orders.get(&trade.maker_order_id), markets.get(&trade.market_id)) else {
                return Err(SettlementError::OrderNotFound(trade.maker_order_id));
            };
            fills.push(to_onchain_order(trade, order, market, self.config.collateral)?);
        }

        Ok(fills)
    }

    /// Returns the final outcome and how many attempts were made
    async fn submit_with_retry(&self, fills: &[OrderFill]) -> (Result<TxResult, ChainError>, u32) {
        let mut delay = self.config.retry_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.config.submit_timeout, self.send(fills)).await {
                Ok(result) => result,
                Err(_) => Err(ChainError::Timeout),
            };

            match result {
                Ok(tx) => return (Ok(tx), attempt),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Settlement submission failed, retrying");
                    metrics::counter!(m::SETTLEMENT_RETRIES).increment(1);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    async fn send(&self, fills: &[OrderFill]) -> Result<TxResult, ChainError> {
        match fills {
            [single] => {
                self.gateway
                    .fill_order(&single.order, &single.signature, single.fill_amount)
                    .await
            }
            many => self.gateway.fill_orders(many).await,
        }
    }

    /// Form and submit batches until nothing is left or the per-run cap is hit
    pub async fn run_once(&self) -> Result<RunSummary, SettlementError> {
        let mut summary = RunSummary::default();

        for _ in 0..self.config.max_batches_per_run {
            let Some(batch) = self.form_batch(self.config.max_batch_size).await? else {
                break;
            };
            let batch = self.submit(batch.id).await?;
            summary.record(batch.status, batch.trade_count as usize);
        }

        if summary != RunSummary::default() {
            info!(
                completed = summary.batches_completed,
                failed = summary.batches_failed,
                trades = summary.trades_settled,
                "Settlement run finished"
            );
        }
        Ok(summary)
    }

    /// Reconcile batches left `pending` or `processing` by a process that
    /// stopped mid-submission.
    ///
    /// A `processing` batch that already holds a receipt reached the chain
    /// and is completed. Anything else is failed, releasing its trades, but
    /// only once it is older than [`SettlementConfig::submission_window`],
    /// so a submission still running elsewhere is left alone.
    pub async fn recover_interrupted(&self) -> Result<usize, SettlementError> {
        let now = self.clock.now();
        let window = self.config.submission_window();
        let mut recovered = 0;

        for status in [BatchStatus::Pending, BatchStatus::Processing] {
            for mut batch in self.repo.list_batches_by_status(status).await? {
                if self.in_flight.contains(&batch.id) {
                    continue;
                }

                if batch.has_receipt() {
                    warn!(batch_id = %batch.id, tx_hash = ?batch.tx_hash, "Completing batch confirmed on-chain before an interruption");
                    batch.mark_completed(now);
                } else {
                    let since = batch.processed_at.unwrap_or(batch.created_at);
                    let age = (now - since).to_std().unwrap_or_default();
                    if age < window {
                        debug!(batch_id = %batch.id, %status, age_secs = age.as_secs(), "Batch may still be submitting, skipping");
                        continue;
                    }
                    if status == BatchStatus::Processing {
                        error!(
                            batch_id = %batch.id,
                            trade_count = batch.trade_count,
                            "Batch was processing without a receipt; check the chain before resubmitting its trades"
                        );
                    }
                    batch.mark_failed(format!("interrupted while {}", status), None, now);
                }

                if self.repo.update_batch(&batch, status).await? {
                    let counter = if batch.status == BatchStatus::Completed { m::BATCHES_COMPLETED } else { m::BATCHES_FAILED };
                    metrics::counter!(counter).increment(1);
                    recovered += 1;
                } else {
                    debug!(batch_id = %batch.id, "Batch changed during recovery, leaving it");
                }
            }
        }

        if recovered > 0 {
            warn!(recovered, "Recovered interrupted settlement batches");
        }
        Ok(recovered)
    }

    /// Start the background worker for the configured trigger.
    /// Returns `None` when settlement is disabled or manual.
    pub fn start_worker(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enabled || self.config.trigger == SettlementTrigger::Manual {
            info!(enabled = self.config.enabled, trigger = ?self.config.trigger, "Settlement worker not started");
            return None;
        }

        let every: Duration = self.config.interval;
        Some(tokio::spawn(async move {
            info!(trigger = ?self.config.trigger, interval_secs = every.as_secs(), "Settlement worker started");
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;

                if self.config.trigger == SettlementTrigger::TradeCount {
                    match self.repo.count_unsettled_trades(None).await {
                        Ok(count) if count < self.config.trade_threshold => continue,
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Failed to count unsettled trades");
                            continue;
                        }
                    }
                }

                if let Err(e) = self.recover_interrupted().await {
                    error!(error = %e, "Settlement recovery failed");
                }
                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Settlement run failed");
                }
            }
        }))
    }
}

fn ensure_pending(batch: &SettlementBatch) -> Result<(), SettlementError> {
    match batch.status {
        BatchStatus::Pending => Ok(()),
        BatchStatus::Completed => Err(SettlementError::AlreadyCompleted(batch.id)),
        BatchStatus::Failed => Err(SettlementError::AlreadyFailed(batch.id)),
        BatchStatus::Processing => Err(SettlementError::InProgress(batch.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::OnChainOrder;
    use crate::clock::ManualClock;
    use crate::db::MemoryRepository;
    use crate::models::{OrderSide, OrderStatus, ShareType, TimeInForce, Trade, TradeSettlementStatus};
    use async_trait::async_trait;
    use ethers::types::{Bytes, H256, U256};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;

    /// Gateway that replays scripted results and records every call
    #[derive(Default)]
    struct ScriptedGateway {
        results: Mutex<VecDeque<Result<TxResult, ChainError>>>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedGateway {
        fn push(&self, result: Result<TxResult, ChainError>) {
            self.results.lock().push_back(result);
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn next(&self, fills: usize) -> Result<TxResult, ChainError> {
            self.calls.lock().push(fills);
            self.results.lock().pop_front().unwrap_or_else(|| Ok(receipt(1)))
        }
    }

    #[async_trait]
    impl ExchangeGateway for ScriptedGateway {
        async fn fill_order(&self, _: &OnChainOrder, _: &Bytes, _: U256) -> Result<TxResult, ChainError> {
            self.next(1)
        }

        async fn fill_orders(&self, fills: &[OrderFill]) -> Result<TxResult, ChainError> {
            self.next(fills.len())
        }
    }

    fn receipt(byte: u8) -> TxResult {
        TxResult {
            tx_hash: H256::repeat_byte(byte),
            block_number: Some(100),
            gas_used: Some(U256::from(150_000u64)),
        }
    }

    struct Harness {
        batcher: SettlementBatcher,
        repo: Arc<MemoryRepository>,
        gateway: Arc<ScriptedGateway>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let repo = Arc::new(MemoryRepository::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let config = SettlementConfig {
            retry_delay: Duration::from_millis(10),
            submit_timeout: Duration::from_secs(1),
            max_retries: 2,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::default());
        let batcher = SettlementBatcher::new(repo.clone(), gateway.clone(), clock.clone(), config);
        Harness { batcher, repo, gateway, clock }
    }

    fn order(market: &Market, side: OrderSide, price: Decimal, amount: Decimal) -> Order {
        let now = chrono::Utc::now();
        Order {
            id: Uuid::new_v4(),
            maker: "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".to_string(),
            signer: "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".to_string(),
            market_id: market.id,
            share_type: ShareType::Yes,
            side,
            price,
            amount,
            filled_amount: dec!(0),
            status: OrderStatus::Open,
            time_in_force: TimeInForce::Gtc,
            salt: "7".to_string(),
            nonce: 0,
            expiration: 0,
            fee_rate_bps: 0,
            signature_type: 0,
            signature: format!("0x{}", "22".repeat(65)),
            created_at: now,
            updated_at: now,
        }
    }

    /// Seed a market plus `n` trades against one resting maker
    async fn seed_trades(repo: &MemoryRepository, n: usize) -> Vec<Uuid> {
        let now = chrono::Utc::now();
        let market = Market::new("q", format!("0x{}", "cd".repeat(32)), "q", now, now);
        repo.save_market(&market).await.unwrap();
        let maker = order(&market, OrderSide::Sell, dec!(0.55), dec!(100));
        repo.save_order(&maker).await.unwrap();

        let mut ids = Vec::new();
        for i in 0..n {
            let taker = order(&market, OrderSide::Buy, dec!(0.60), dec!(1));
            let trade = Trade::from_fill(
                &taker,
                maker.id,
                &maker.maker,
                maker.price,
                dec!(1),
                now + chrono::Duration::milliseconds(i as i64),
            );
            repo.save_trade(&trade).await.unwrap();
            ids.push(trade.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_form_batch_claims_oldest_first() {
        let h = harness();
        let ids = seed_trades(&h.repo, 3).await;

        let batch = h.batcher.form_batch(2).await.unwrap().unwrap();
        assert_eq!(batch.trade_ids, ids[..2].to_vec());
        assert_eq!(batch.status, BatchStatus::Pending);

        let second = h.batcher.form_batch(2).await.unwrap().unwrap();
        assert_eq!(second.trade_ids, vec![ids[2]]);
        assert!(h.batcher.form_batch(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successful_submit_settles_trades() {
        let h = harness();
        let ids = seed_trades(&h.repo, 2).await;
        let batch = h.batcher.form_batch(10).await.unwrap().unwrap();

        let done = h.batcher.submit(batch.id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Completed);
        assert_eq!(done.block_number, Some(100));
        assert_eq!(done.gas_used, Some(150_000));
        assert_eq!(h.gateway.calls.lock().clone(), vec![2]);

        for trade in h.repo.get_trades(&ids).await.unwrap() {
            assert_eq!(trade.settlement_status, TradeSettlementStatus::Settled);
            assert_eq!(trade.settlement_tx_hash, done.tx_hash);
            assert_eq!(trade.settlement_block, Some(100));
        }
    }

    #[tokio::test]
    async fn test_completed_batch_is_not_resubmitted() {
        let h = harness();
        seed_trades(&h.repo, 1).await;
        let batch = h.batcher.form_batch(10).await.unwrap().unwrap();
        h.batcher.submit(batch.id).await.unwrap();

        let err = h.batcher.submit(batch.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::AlreadyCompleted(_)));
        assert_eq!(h.gateway.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let h = harness();
        seed_trades(&h.repo, 1).await;
        h.gateway.push(Err(ChainError::Nonce("nonce too low".into())));
        h.gateway.push(Err(ChainError::Transient("connection reset".into())));

        let batch = h.batcher.form_batch(10).await.unwrap().unwrap();
        let done = h.batcher.submit(batch.id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Completed);
        assert_eq!(done.retry_count, 2);
        assert_eq!(h.gateway.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted_releases_trades() {
        let h = harness();
        let ids = seed_trades(&h.repo, 1).await;
        for _ in 0..3 {
            h.gateway.push(Err(ChainError::Timeout));
        }

        let batch = h.batcher.form_batch(10).await.unwrap().unwrap();
        let done = h.batcher.submit(batch.id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Failed);
        assert_eq!(h.gateway.call_count(), 3);

        let trade = &h.repo.get_trades(&ids).await.unwrap()[0];
        assert_eq!(trade.settlement_status, TradeSettlementStatus::Unsettled);
        assert_eq!(trade.batch_id, None);
        assert_eq!(trade.retry_count, 1);

        let again = h.batcher.form_batch(10).await.unwrap().unwrap();
        assert_eq!(again.trade_ids, ids);
    }

    #[tokio::test]
    async fn test_revert_is_not_retried() {
        let h = harness();
        seed_trades(&h.repo, 1).await;
        h.gateway.push(Err(ChainError::Reverted {
            tx_hash: Some(H256::repeat_byte(9)),
            reason: "insufficient allowance".into(),
        }));

        let batch = h.batcher.form_batch(10).await.unwrap().unwrap();
        let done = h.batcher.submit(batch.id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Failed);
        assert_eq!(h.gateway.call_count(), 1);
        assert!(done.error_message.unwrap().contains("insufficient allowance"));
        assert_eq!(done.tx_hash, Some(format!("{:?}", H256::repeat_byte(9))));

        let err = h.batcher.submit(batch.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::AlreadyFailed(_)));
    }

    #[tokio::test]
    async fn test_trades_past_attempt_budget_are_parked() {
        let h = harness();
        let ids = seed_trades(&h.repo, 1).await;
        let mut trade = h.repo.get_trades(&ids).await.unwrap().remove(0);
        trade.retry_count = h.batcher.config().max_trade_attempts;
        h.repo.save_trade(&trade).await.unwrap();

        assert!(h.batcher.form_batch(10).await.unwrap().is_none());
        assert_eq!(h.repo.count_unsettled_trades(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_maker_order_fails_batch() {
        let h = harness();
        let now = chrono::Utc::now();
        let market = Market::new("q", format!("0x{}", "cd".repeat(32)), "q", now, now);
        h.repo.save_market(&market).await.unwrap();
        let taker = order(&market, OrderSide::Buy, dec!(0.5), dec!(1));
        let trade = Trade::from_fill(&taker, Uuid::new_v4(), "0x00", dec!(0.5), dec!(1), now);
        h.repo.save_trade(&trade).await.unwrap();

        let batch = h.batcher.form_batch(10).await.unwrap().unwrap();
        let done = h.batcher.submit(batch.id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Failed);
        assert_eq!(h.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_once_drains_in_batches() {
        let mut h = harness();
        h.batcher.config.max_batch_size = 2;
        seed_trades(&h.repo, 5).await;

        let summary = h.batcher.run_once().await.unwrap();
        assert_eq!(summary.batches_completed, 3);
        assert_eq!(summary.trades_settled, 5);
        assert_eq!(h.repo.count_unsettled_trades(None).await.unwrap(), 0);
    }

    /// Put a freshly formed batch into `processing` as a crashed run would
    async fn stranded_batch(h: &Harness, trades: usize) -> (SettlementBatch, Vec<Uuid>) {
        let ids = seed_trades(&h.repo, trades).await;
        let mut batch = h.batcher.form_batch(10).await.unwrap().unwrap();
        batch.mark_processing(h.clock.now());
        assert!(h.repo.update_batch(&batch, BatchStatus::Pending).await.unwrap());
        (batch, ids)
    }

    fn past_window(h: &Harness) -> chrono::Duration {
        chrono::Duration::from_std(h.batcher.config().submission_window()).unwrap() + chrono::Duration::seconds(1)
    }

    #[tokio::test]
    async fn test_recover_interrupted_releases_trades() {
        let h = harness();
        let (batch, ids) = stranded_batch(&h, 2).await;

        h.clock.advance(past_window(&h));
        assert_eq!(h.batcher.recover_interrupted().await.unwrap(), 1);
        let stored = h.repo.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        for trade in h.repo.get_trades(&ids).await.unwrap() {
            assert!(trade.is_claimable());
        }
    }

    #[tokio::test]
    async fn test_recover_skips_recent_batches() {
        let h = harness();
        let (batch, ids) = stranded_batch(&h, 1).await;

        h.clock.advance(chrono::Duration::seconds(5));
        assert_eq!(h.batcher.recover_interrupted().await.unwrap(), 0);
        assert_eq!(h.repo.get_batch(batch.id).await.unwrap().unwrap().status, BatchStatus::Processing);
        assert_eq!(h.repo.get_trades(&ids).await.unwrap()[0].batch_id, Some(batch.id));
    }

    #[tokio::test]
    async fn test_recover_completes_batch_with_receipt() {
        let h = harness();
        let (mut batch, ids) = stranded_batch(&h, 2).await;
        batch.record_receipt(format!("{:?}", H256::repeat_byte(4)), Some(77), Some(1));
        assert!(h.repo.update_batch(&batch, BatchStatus::Processing).await.unwrap());

        // No window wait: the receipt proves the transaction landed
        assert_eq!(h.batcher.recover_interrupted().await.unwrap(), 1);

        let stored = h.repo.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Completed);
        for trade in h.repo.get_trades(&ids).await.unwrap() {
            assert_eq!(trade.settlement_status, TradeSettlementStatus::Settled);
            assert_eq!(trade.settlement_tx_hash, batch.tx_hash);
            assert_eq!(trade.settlement_block, Some(77));
        }
        assert!(h.batcher.form_batch(10).await.unwrap().is_none());
        assert_eq!(h.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_processing_batch_is_not_resubmitted() {
        let h = harness();
        let (batch, _) = stranded_batch(&h, 1).await;

        let err = h.batcher.submit(batch.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::InProgress(_)));
        assert_eq!(h.gateway.call_count(), 0);
    }
}
