//! Matching Engine
//!
//! Owns one [`Orderbook`] per (market, outcome) and serializes every
//! operation on a book behind that book's mutex. Different books match in
//! parallel.
//!
//! Submission flow, all under the book lock:
//!
//! ```text
//! validate → plan_match → (FOK check) → repo.record_match → book.apply → rest remainder
//! ```
//!
//! The book is only mutated after the store accepted the match, so a failed
//! write leaves both sides unchanged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::orderbook::Orderbook;
use super::types::*;
use crate::clock::Clock;
use crate::db::{RepoError, Repository};
use crate::metrics as m;
use crate::models::order::AMOUNT_DECIMALS;
use crate::models::{Order, OrderStatus, ShareType, TimeInForce, Trade};

/// The main matching engine
pub struct MatchingEngine {
    /// One book per (market, outcome), created on first use
    books: DashMap<BookKey, Arc<Mutex<Orderbook>>>,

    repo: Arc<dyn Repository>,

    clock: Arc<dyn Clock>,

    config: MatchingConfig,

    /// Trade event broadcaster
    trade_sender: broadcast::Sender<TradeEvent>,

    /// Top-of-book broadcaster
    book_sender: broadcast::Sender<BookDelta>,
}

impl MatchingEngine {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, config: MatchingConfig) -> Self {
        let (trade_sender, _) = broadcast::channel(config.event_buffer);
        let (book_sender, _) = broadcast::channel(config.event_buffer);

        info!(
            allow_self_trade = config.allow_self_trade,
            "MatchingEngine initialized"
        );

        Self {
            books: DashMap::new(),
            repo,
            clock,
            config,
            trade_sender,
            book_sender,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Get trade event receiver
    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeEvent> {
        self.trade_sender.subscribe()
    }

    /// Get top-of-book update receiver
    pub fn subscribe_book_deltas(&self) -> broadcast::Receiver<BookDelta> {
        self.book_sender.subscribe()
    }

    fn book(&self, key: BookKey) -> Arc<Mutex<Orderbook>> {
        self.books
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Orderbook::new(key))))
            .clone()
    }

    /// Best bid and best ask of one book. Empty sides are `None`.
    pub async fn top_of_book(&self, market_id: Uuid, share_type: ShareType) -> (Option<BookTop>, Option<BookTop>) {
        let Some(book) = self
            .books
            .get(&BookKey::new(market_id, share_type))
            .map(|b| Arc::clone(b.value()))
        else {
            return (None, None);
        };
        let book = book.lock().await;
        (book.best_bid(), book.best_ask())
    }

    fn publish_delta(&self, delta: BookDelta) {
        // No subscribers is fine
        let _ = self.book_sender.send(delta);
    }

    // ========================================================================
    // Order Operations
    // ========================================================================

    fn validate(order: &Order, now: chrono::DateTime<chrono::Utc>) -> Result<(), MatchingError> {
        Orderbook::validate_price(order.price)?;

        if order.amount <= Decimal::ZERO {
            return Err(MatchingError::InvalidAmount(format!(
                "Amount {} must be positive",
                order.amount
            )));
        }
        if order.amount.normalize().scale() > AMOUNT_DECIMALS {
            return Err(MatchingError::InvalidAmount(format!(
                "Amount {} has more than {} decimal places",
                order.amount, AMOUNT_DECIMALS
            )));
        }
        if order.status != OrderStatus::Open || !order.filled_amount.is_zero() {
            return Err(MatchingError::InvalidOrder(
                "New orders must be open and unfilled".to_string(),
            ));
        }
        if order.is_expired_at(now) {
            return Err(MatchingError::OrderExpired(order.expiration));
        }
        Ok(())
    }

    /// Match a new order against its book.
    ///
    /// Returns the taker in its post-match state with the trades it produced.
    /// Validation failures are returned before anything is written.
    pub async fn submit(&self, order: Order) -> Result<SubmitResult, MatchingError> {
        let started = Instant::now();
        let result = self.submit_inner(order).await;

        match &result {
            Ok(res) => {
                metrics::counter!(m::ORDERS_SUBMITTED).increment(1);
                metrics::counter!(m::TRADES_EXECUTED).increment(res.trades.len() as u64);
                metrics::histogram!(m::MATCH_LATENCY).record(started.elapsed().as_secs_f64());
            }
            Err(e) => {
                metrics::counter!(m::ORDERS_REJECTED, "reason" => e.kind()).increment(1);
            }
        }
        result
    }

    async fn submit_inner(&self, mut order: Order) -> Result<SubmitResult, MatchingError> {
        let now = self.clock.now();
        Self::validate(&order, now)?;

        let market = self
            .repo
            .get_market(order.market_id)
            .await?
            .ok_or(MatchingError::MarketNotFound(order.market_id))?;
        if !market.state.is_trading() {
            return Err(MatchingError::MarketNotActive(order.market_id));
        }

        let key = BookKey::of(&order);
        let book = self.book(key);
        let mut book = book.lock().await;

        // Under the book lock, so a concurrent resubmit sees the first write
        if book.has_order(&order.id) || self.repo.get_order(order.id).await?.is_some() {
            return Err(MatchingError::DuplicateOrder(order.id));
        }

        debug!(
            order_id = %order.id,
            book = %key,
            side = %order.side,
            price = %order.price,
            amount = %order.amount,
            "Processing order"
        );

        let plan = book.plan_match(
            order.side,
            order.price,
            order.amount,
            &order.maker,
            self.config.allow_self_trade,
            now,
        )?;

        if order.time_in_force == TimeInForce::Fok && plan.taker_remaining > Decimal::ZERO {
            return Err(MatchingError::InsufficientLiquidity);
        }

        let trades: Vec<Trade> = plan
            .fills
            .iter()
            .map(|fill| {
                Trade::from_fill(
                    &order,
                    fill.maker_order_id,
                    &fill.maker_address,
                    fill.price,
                    fill.amount,
                    now,
                )
            })
            .collect();

        for fill in &plan.fills {
            order.apply_fill(fill.amount, now);
        }
        order.updated_at = now;
        if plan.taker_remaining > Decimal::ZERO && order.time_in_force == TimeInForce::Ioc {
            order.status = OrderStatus::Cancelled;
        }

        let record = MatchRecord {
            taker: order.clone(),
            maker_fills: plan.fills.iter().map(|f| (f.maker_order_id, f.amount)).collect(),
            trades: trades.clone(),
            expired: plan.expired.clone(),
        };
        match self.repo.record_match(&record).await {
            Ok(()) => {}
            // Same id submitted concurrently against another book
            Err(RepoError::Duplicate(_)) => return Err(MatchingError::DuplicateOrder(order.id)),
            Err(e) => {
                error!(order_id = %order.id, book = %key, error = %e, "Failed to persist match");
                return Err(e.into());
            }
        }

        book.apply(&plan);

        if order.status.is_active() && order.remaining_amount() > Decimal::ZERO {
            // Validated above and persisted; a failure here means the book drifted
            if let Err(e) = book.insert(OrderEntry::from_order(&order), now) {
                error!(order_id = %order.id, book = %key, error = %e, "Failed to rest order");
            }
        }

        if book.is_crossed() {
            error!(order_id = %order.id, book = %key, "Book crossed after match");
        }

        let delta = book.delta(now);
        drop(book);

        for trade in &trades {
            let _ = self.trade_sender.send(TradeEvent::from(trade));
        }
        self.publish_delta(delta);

        if !plan.expired.is_empty() {
            metrics::counter!(m::ORDERS_EXPIRED).increment(plan.expired.len() as u64);
        }

        info!(
            order_id = %order.id,
            book = %key,
            status = %order.status,
            trades = trades.len(),
            filled = %order.filled_amount,
            "Order processed"
        );

        Ok(SubmitResult { order, trades })
    }

    /// Cancel a resting order on behalf of its owner.
    ///
    /// Takes the book lock, so a cancel racing a match sees either the order
    /// still resting or already terminal. The latter is not an error.
    pub async fn cancel(&self, order_id: Uuid, owner: &str) -> Result<CancelOutcome, MatchingError> {
        let order = self
            .repo
            .get_order(order_id)
            .await?
            .ok_or(MatchingError::OrderNotFound(order_id))?;

        if !order.maker.eq_ignore_ascii_case(owner) {
            return Err(MatchingError::NotOwner(order_id));
        }

        let key = BookKey::of(&order);
        let book = self.book(key);
        let mut book = book.lock().await;
        let now = self.clock.now();

        let cancelled = self.repo.cancel_order(order_id, now).await?;
        book.remove(order_id);

        if !cancelled {
            let status = self
                .repo
                .get_order(order_id)
                .await?
                .map(|o| o.status)
                .unwrap_or(order.status);
            debug!(%order_id, %status, "Cancel on terminal order ignored");
            return Ok(CancelOutcome::AlreadyTerminal(status));
        }

        let delta = book.delta(now);
        drop(book);
        self.publish_delta(delta);

        metrics::counter!(m::ORDERS_CANCELLED).increment(1);
        info!(%order_id, book = %key, "Order cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rebuild every book from the store's open orders.
    ///
    /// Orders already expired are marked expired instead of restored.
    /// Returns the number of orders put back on a book.
    pub async fn recover(&self) -> Result<usize, MatchingError> {
        let now = self.clock.now();
        let mut restored = 0;

        for (market_id, share_type) in self.repo.list_open_books().await? {
            let key = BookKey::new(market_id, share_type);
            let orders = self.repo.load_open_orders(market_id, share_type).await?;

            let book = self.book(key);
            let mut book = book.lock().await;
            let mut expired = Vec::new();

            for order in orders {
                if order.is_expired_at(now) {
                    expired.push(order.id);
                    continue;
                }
                if book.has_order(&order.id) {
                    continue;
                }
                match book.insert(OrderEntry::from_order(&order), now) {
                    Ok(()) => restored += 1,
                    Err(e) => warn!(order_id = %order.id, book = %key, error = %e, "Skipping unrecoverable order"),
                }
            }

            if !expired.is_empty() {
                self.repo.expire_orders(&expired, now).await?;
                metrics::counter!(m::ORDERS_EXPIRED).increment(expired.len() as u64);
            }
            self.publish_delta(book.delta(now));
        }

        info!(restored, books = self.books.len(), "Order books recovered");
        Ok(restored)
    }

    /// Remove expired resting orders from every book and mark them expired
    pub async fn sweep_expired(&self) -> Result<usize, MatchingError> {
        let now = self.clock.now();
        let books: Vec<(BookKey, Arc<Mutex<Orderbook>>)> = self
            .books
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut total = 0;
        for (key, book) in books {
            let mut book = book.lock().await;
            let expired = book.sweep_expired(now);
            if expired.is_empty() {
                continue;
            }

            self.repo.expire_orders(&expired, now).await?;
            total += expired.len();
            debug!(book = %key, count = expired.len(), resting = book.order_count(), "Swept expired orders");
            self.publish_delta(book.delta(now));
        }

        if total > 0 {
            metrics::counter!(m::ORDERS_EXPIRED).increment(total as u64);
            info!(count = total, "Expired orders removed");
        }
        Ok(total)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) on a fixed interval
    pub fn start_expiry_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = every.as_secs(), "Expiry sweeper started");
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired().await {
                    error!(error = %e, "Expiry sweep failed");
                }
            }
        })
    }
}
