//! PostgreSQL repository
//!
//! Runtime-checked sqlx queries. Multi-row writes run inside one transaction;
//! races are resolved with conditional `UPDATE ... WHERE` clauses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::PgExecutor;
use uuid::Uuid;

use super::repository::{RepoError, Repository};
use crate::models::{BatchStatus, Market, Order, ResolutionState, SettlementBatch, ShareType, Trade};
use crate::services::matching::MatchRecord;

const ORDER_COLUMNS: &str = "id, maker, signer, market_id, share_type, side, price, amount, filled_amount, \
     status, time_in_force, salt, nonce, expiration, fee_rate_bps, signature_type, signature, created_at, updated_at";

const TRADE_COLUMNS: &str = "id, market_id, share_type, price, amount, maker_order_id, taker_order_id, \
     maker_address, taker_address, taker_side, settlement_status, batch_id, settlement_tx_hash, \
     settlement_block, settled_at, retry_count, created_at";

const BATCH_COLUMNS: &str = "id, trade_ids, trade_count, status, tx_hash, block_number, gas_used, \
     error_message, retry_count, created_at, processed_at, completed_at";

const MARKET_COLUMNS: &str = "id, question, condition_id, ancillary_data, resolution_time, state, \
     request_timestamp, resolved_price, payouts, last_error, created_at, updated_at, resolved_at, settled_at";

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_ORDER: &str = r#"
    INSERT INTO orders (
        id, maker, signer, market_id, share_type, side, price, amount, filled_amount,
        status, time_in_force, salt, nonce, expiration, fee_rate_bps, signature_type,
        signature, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
"#;

const UPSERT_ORDER_SUFFIX: &str = r#"
    ON CONFLICT (id) DO UPDATE SET
        filled_amount = EXCLUDED.filled_amount,
        status = EXCLUDED.status,
        updated_at = EXCLUDED.updated_at
"#;

/// Insert an order. With `upsert` an existing row has its fill state
/// overwritten; without it a duplicate id fails with a unique violation.
async fn write_order<'e, E: PgExecutor<'e>>(exec: E, order: &Order, upsert: bool) -> Result<(), sqlx::Error> {
    let sql = if upsert {
        format!("{}{}", INSERT_ORDER, UPSERT_ORDER_SUFFIX)
    } else {
        INSERT_ORDER.to_string()
    };
    sqlx::query(&sql)
    .bind(order.id)
    .bind(&order.maker)
    .bind(&order.signer)
    .bind(order.market_id)
    .bind(order.share_type)
    .bind(order.side)
    .bind(order.price)
    .bind(order.amount)
    .bind(order.filled_amount)
    .bind(order.status)
    .bind(order.time_in_force)
    .bind(&order.salt)
    .bind(order.nonce)
    .bind(order.expiration)
    .bind(order.fee_rate_bps)
    .bind(order.signature_type)
    .bind(&order.signature)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(exec)
    .await?;
    Ok(())
}

async fn insert_trade<'e, E: PgExecutor<'e>>(exec: E, trade: &Trade) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO trades (
            id, market_id, share_type, price, amount, maker_order_id, taker_order_id,
            maker_address, taker_address, taker_side, settlement_status, batch_id,
            settlement_tx_hash, settlement_block, settled_at, retry_count, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(trade.id)
    .bind(trade.market_id)
    .bind(trade.share_type)
    .bind(trade.price)
    .bind(trade.amount)
    .bind(trade.maker_order_id)
    .bind(trade.taker_order_id)
    .bind(&trade.maker_address)
    .bind(&trade.taker_address)
    .bind(trade.taker_side)
    .bind(trade.settlement_status)
    .bind(trade.batch_id)
    .bind(&trade.settlement_tx_hash)
    .bind(trade.settlement_block)
    .bind(trade.settled_at)
    .bind(trade.retry_count)
    .bind(trade.created_at)
    .execute(exec)
    .await?;
    Ok(())
}

#[async_trait]
impl Repository for PgRepository {
    async fn save_order(&self, order: &Order) -> Result<(), RepoError> {
        write_order(&self.pool, order, true).await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError> {
        let order = sqlx::query_as::<_, Order>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn load_open_orders(&self, market_id: Uuid, share_type: ShareType) -> Result<Vec<Order>, RepoError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders \
             WHERE market_id = $1 AND share_type = $2 AND status IN ('open', 'partially_filled') \
             ORDER BY created_at ASC, seq ASC",
            ORDER_COLUMNS
        ))
        .bind(market_id)
        .bind(share_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn list_open_books(&self) -> Result<Vec<(Uuid, ShareType)>, RepoError> {
        let books: Vec<(Uuid, ShareType)> = sqlx::query_as(
            r#"
            SELECT DISTINCT market_id, share_type
            FROM orders
            WHERE status IN ('open', 'partially_filled')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    async fn record_match(&self, record: &MatchRecord) -> Result<(), RepoError> {
        let now = record.taker.updated_at;
        let mut tx = self.pool.begin().await?;

        for (maker_id, amount) in &record.maker_fills {
            let result = sqlx::query(
                r#"
                UPDATE orders
                SET
                    filled_amount = filled_amount + $2,
                    status = CASE
                        WHEN amount - (filled_amount + $2) = 0 THEN 'filled'::order_status
                        ELSE 'partially_filled'::order_status
                    END,
                    updated_at = $3
                WHERE id = $1
                  AND status IN ('open', 'partially_filled')
                  AND amount - filled_amount >= $2
                "#,
            )
            .bind(maker_id)
            .bind(amount)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                // Dropping the transaction rolls it back
                return Err(RepoError::Conflict(format!(
                    "maker order {} cannot absorb fill of {}",
                    maker_id, amount
                )));
            }
        }

        if !record.expired.is_empty() {
            sqlx::query(
                r#"
                UPDATE orders
                SET status = 'expired', updated_at = $2
                WHERE id = ANY($1) AND status IN ('open', 'partially_filled')
                "#,
            )
            .bind(&record.expired)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if let Err(e) = write_order(&mut *tx, &record.taker, false).await {
            return Err(match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    RepoError::Duplicate(format!("order {}", record.taker.id))
                }
                e => e.into(),
            });
        }

        for trade in &record.trades {
            insert_trade(&mut *tx, trade).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn expire_orders(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<u64, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'expired', updated_at = $2
            WHERE id = ANY($1) AND status IN ('open', 'partially_filled')
            "#,
        )
        .bind(ids)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel_order(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'cancelled', updated_at = $2
            WHERE id = $1 AND status IN ('open', 'partially_filled')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_order(id).await? {
            Some(_) => Ok(false),
            None => Err(RepoError::NotFound(format!("order {}", id))),
        }
    }

    async fn save_trade(&self, trade: &Trade) -> Result<(), RepoError> {
        insert_trade(&self.pool, trade).await?;
        Ok(())
    }

    async fn get_trades(&self, ids: &[Uuid]) -> Result<Vec<Trade>, RepoError> {
        let mut trades = sqlx::query_as::<_, Trade>(&format!("SELECT {} FROM trades WHERE id = ANY($1)", TRADE_COLUMNS))
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        trades.sort_by_key(|t| ids.iter().position(|id| *id == t.id));
        Ok(trades)
    }

    async fn list_unsettled_trades(&self, limit: i64, max_retry_count: i32) -> Result<Vec<Trade>, RepoError> {
        let trades = sqlx::query_as::<_, Trade>(&format!(
            "SELECT {} FROM trades \
             WHERE settlement_status = 'unsettled' AND batch_id IS NULL AND retry_count < $2 \
             ORDER BY created_at ASC \
             LIMIT $1",
            TRADE_COLUMNS
        ))
        .bind(limit)
        .bind(max_retry_count)
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    async fn count_unsettled_trades(&self, market_id: Option<Uuid>) -> Result<i64, RepoError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM trades
            WHERE settlement_status = 'unsettled'
              AND ($1::uuid IS NULL OR market_id = $1)
            "#,
        )
        .bind(market_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn claim_trades_for_batch(&self, batch: &SettlementBatch) -> Result<Vec<Uuid>, RepoError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE trades
            SET batch_id = $1
            WHERE id = ANY($2)
              AND batch_id IS NULL
              AND settlement_status = 'unsettled'
            RETURNING id
            "#,
        )
        .bind(batch.id)
        .bind(&batch.trade_ids)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        // Keep the requested order
        let claimed: Vec<Uuid> = batch
            .trade_ids
            .iter()
            .copied()
            .filter(|id| rows.iter().any(|(claimed,)| claimed == id))
            .collect();
        let stored = batch.clone().with_trade_ids(claimed.clone());

        sqlx::query(
            r#"
            INSERT INTO settlement_batches (
                id, trade_ids, trade_count, status, tx_hash, block_number, gas_used,
                error_message, retry_count, created_at, processed_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.trade_ids)
        .bind(stored.trade_count)
        .bind(stored.status)
        .bind(&stored.tx_hash)
        .bind(stored.block_number)
        .bind(stored.gas_used)
        .bind(&stored.error_message)
        .bind(stored.retry_count)
        .bind(stored.created_at)
        .bind(stored.processed_at)
        .bind(stored.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(claimed)
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<SettlementBatch>, RepoError> {
        let batch = sqlx::query_as::<_, SettlementBatch>(&format!(
            "SELECT {} FROM settlement_batches WHERE id = $1",
            BATCH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(batch)
    }

    async fn update_batch(&self, batch: &SettlementBatch, expected: BatchStatus) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE settlement_batches
            SET
                status = $2,
                tx_hash = $3,
                block_number = $4,
                gas_used = $5,
                error_message = $6,
                retry_count = $7,
                processed_at = $8,
                completed_at = $9
            WHERE id = $1 AND status = $10
            "#,
        )
        .bind(batch.id)
        .bind(batch.status)
        .bind(&batch.tx_hash)
        .bind(batch.block_number)
        .bind(batch.gas_used)
        .bind(&batch.error_message)
        .bind(batch.retry_count)
        .bind(batch.processed_at)
        .bind(batch.completed_at)
        .bind(expected)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return match self.get_batch(batch.id).await? {
                Some(_) => Ok(false),
                None => Err(RepoError::NotFound(format!("batch {}", batch.id))),
            };
        }

        match batch.status {
            BatchStatus::Completed => {
                sqlx::query(
                    r#"
                    UPDATE trades
                    SET
                        settlement_status = 'settled',
                        settlement_tx_hash = $2,
                        settlement_block = $3,
                        settled_at = $4
                    WHERE batch_id = $1 AND settlement_status = 'unsettled'
                    "#,
                )
                .bind(batch.id)
                .bind(&batch.tx_hash)
                .bind(batch.block_number)
                .bind(batch.completed_at)
                .execute(&mut *tx)
                .await?;
            }
            BatchStatus::Failed => {
                sqlx::query(
                    r#"
                    UPDATE trades
                    SET batch_id = NULL, retry_count = retry_count + 1
                    WHERE batch_id = $1 AND settlement_status = 'unsettled'
                    "#,
                )
                .bind(batch.id)
                .execute(&mut *tx)
                .await?;
            }
            BatchStatus::Pending | BatchStatus::Processing => {}
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_batches_by_status(&self, status: BatchStatus) -> Result<Vec<SettlementBatch>, RepoError> {
        let batches = sqlx::query_as::<_, SettlementBatch>(&format!(
            "SELECT {} FROM settlement_batches WHERE status = $1 ORDER BY created_at ASC",
            BATCH_COLUMNS
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(batches)
    }

    async fn save_market(&self, market: &Market) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO markets (
                id, question, condition_id, ancillary_data, resolution_time, state,
                request_timestamp, resolved_price, payouts, last_error, created_at,
                updated_at, resolved_at, settled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                question = EXCLUDED.question,
                ancillary_data = EXCLUDED.ancillary_data,
                resolution_time = EXCLUDED.resolution_time,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(market.id)
        .bind(&market.question)
        .bind(&market.condition_id)
        .bind(&market.ancillary_data)
        .bind(market.resolution_time)
        .bind(market.state)
        .bind(market.request_timestamp)
        .bind(&market.resolved_price)
        .bind(&market.payouts)
        .bind(&market.last_error)
        .bind(market.created_at)
        .bind(market.updated_at)
        .bind(market.resolved_at)
        .bind(market.settled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_market(&self, id: Uuid) -> Result<Option<Market>, RepoError> {
        let market = sqlx::query_as::<_, Market>(&format!("SELECT {} FROM markets WHERE id = $1", MARKET_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(market)
    }

    async fn list_unfinalized_markets(&self) -> Result<Vec<Market>, RepoError> {
        let markets = sqlx::query_as::<_, Market>(&format!(
            "SELECT {} FROM markets WHERE state <> 'settled_on_chain' ORDER BY created_at ASC",
            MARKET_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(markets)
    }

    async fn update_market_resolution_state(
        &self,
        market: &Market,
        expected: ResolutionState,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE markets
            SET
                state = $2,
                request_timestamp = $3,
                resolved_price = $4,
                payouts = $5,
                last_error = $6,
                updated_at = $7,
                resolved_at = $8,
                settled_at = $9
            WHERE id = $1 AND state = $10
            "#,
        )
        .bind(market.id)
        .bind(market.state)
        .bind(market.request_timestamp)
        .bind(&market.resolved_price)
        .bind(&market.payouts)
        .bind(&market.last_error)
        .bind(market.updated_at)
        .bind(market.resolved_at)
        .bind(market.settled_at)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_market(market.id).await? {
            Some(_) => Ok(false),
            None => Err(RepoError::NotFound(format!("market {}", market.id))),
        }
    }
}
