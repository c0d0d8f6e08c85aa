//! Market Resolution Tracker
//!
//! Drives each market through the optimistic-oracle lifecycle:
//!
//! ```text
//! trading → resolution_requested → proposed ⇄ disputed → resolved → settled_on_chain
//! ```
//!
//! Every write is a compare-and-set on the state it was computed from, so a
//! poller and a manual `resolve` racing on one market cannot both win.

use std::sync::Arc;

use ethers::types::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::*;
use crate::blockchain::{ChainError, OptimisticOracle, OracleRequestState, PriceQuery};
use crate::clock::Clock;
use crate::db::Repository;
use crate::metrics as m;
use crate::models::{Market, ResolutionState};

pub struct ResolutionTracker {
    repo: Arc<dyn Repository>,
    oracle: Arc<dyn OptimisticOracle>,
    clock: Arc<dyn Clock>,
    config: ResolutionConfig,
}

impl ResolutionTracker {
    pub fn new(
        repo: Arc<dyn Repository>,
        oracle: Arc<dyn OptimisticOracle>,
        clock: Arc<dyn Clock>,
        config: ResolutionConfig,
    ) -> Self {
        Self {
            repo,
            oracle,
            clock,
            config,
        }
    }

    async fn load(&self, market_id: Uuid) -> Result<Market, ResolutionError> {
        self.repo
            .get_market(market_id)
            .await?
            .ok_or(ResolutionError::MarketNotFound(market_id))
    }

    fn query(market: &Market) -> Result<PriceQuery, ResolutionError> {
        let timestamp = market
            .request_timestamp
            .and_then(|ts| u64::try_from(ts).ok())
            .ok_or(ResolutionError::NotRequested(market.id))?;
        Ok(PriceQuery::yes_or_no(
            timestamp,
            Bytes::from(market.ancillary_data.as_bytes().to_vec()),
        ))
    }

    /// True once the oracle reports a final value
    pub async fn can_resolve(&self, market_id: Uuid) -> Result<bool, ResolutionError> {
        let market = self.load(market_id).await?;
        if market.state.is_final() {
            return Ok(true);
        }
        if market.request_timestamp.is_none() {
            return Ok(false);
        }
        Ok(self.oracle.has_price(&Self::query(&market)?).await?)
    }

    /// Pull the final price and persist payouts.
    ///
    /// Calling this on a market that is already resolved returns it unchanged.
    pub async fn resolve(&self, market_id: Uuid) -> Result<Market, ResolutionError> {
        let market = self.load(market_id).await?;
        if market.state.is_final() {
            debug!(%market_id, state = %market.state, "Market already resolved");
            return Ok(market);
        }
        self.resolve_loaded(market).await
    }

    async fn resolve_loaded(&self, mut market: Market) -> Result<Market, ResolutionError> {
        if !market.state.can_transition_to(ResolutionState::Resolved) {
            return Err(ResolutionError::InvalidTransition {
                from: market.state,
                to: ResolutionState::Resolved,
            });
        }

        let query = Self::query(&market)?;
        if !self.oracle.has_price(&query).await? {
            return Err(ResolutionError::NotReady(market.id));
        }
        let price = self.oracle.get_price(&query).await?;

        let payouts = match payouts_for_price(price) {
            Ok(payouts) => payouts,
            Err(e) => {
                error!(market_id = %market.id, %price, "Oracle returned an unmappable price");
                self.record_error(&mut market, e.to_string()).await?;
                return Err(e);
            }
        };

        let expected = market.state;
        let now = self.clock.now();
        market.state = ResolutionState::Resolved;
        market.resolved_price = Some(price.to_string());
        market.payouts = Some(payouts);
        market.last_error = None;
        market.resolved_at = Some(now);
        market.updated_at = now;

        if !self.repo.update_market_resolution_state(&market, expected).await? {
            let current = self.load(market.id).await?;
            if current.state.is_final() {
                return Ok(current);
            }
            return Err(ResolutionError::Conflict(market.id));
        }

        metrics::counter!(m::RESOLUTION_TRANSITIONS, "to" => "resolved").increment(1);
        info!(
            market_id = %market.id,
            price = %price,
            winner = ?market.winning_share(),
            "Market resolved"
        );
        Ok(market)
    }

    async fn transition(&self, market: &mut Market, next: ResolutionState) -> Result<(), ResolutionError> {
        let expected = market.state;
        if !expected.can_transition_to(next) {
            return Err(ResolutionError::InvalidTransition { from: expected, to: next });
        }

        market.state = next;
        market.last_error = None;
        market.updated_at = self.clock.now();
        if !self.repo.update_market_resolution_state(market, expected).await? {
            return Err(ResolutionError::Conflict(market.id));
        }

        metrics::counter!(m::RESOLUTION_TRANSITIONS, "to" => next.as_str()).increment(1);
        info!(market_id = %market.id, from = %expected, to = %next, "Market resolution state changed");
        Ok(())
    }

    async fn record_error(&self, market: &mut Market, message: String) -> Result<(), ResolutionError> {
        metrics::counter!(m::ORACLE_ERRORS).increment(1);
        market.last_error = Some(message);
        market.updated_at = self.clock.now();
        self.repo.update_market_resolution_state(market, market.state).await?;
        Ok(())
    }

    /// Advance one market as far as the oracle allows. Oracle failures are
    /// recorded in `last_error`; the returned state is where the market ended.
    pub async fn poll_market(&self, market_id: Uuid) -> Result<ResolutionState, ResolutionError> {
        let mut market = self.load(market_id).await?;
        let now = self.clock.now();

        match market.state {
            ResolutionState::Trading => {
                if now < market.resolution_time {
                    return Ok(market.state);
                }

                market.request_timestamp = Some(now.timestamp());
                let query = Self::query(&market)?;
                match self.oracle.request_price(&query).await {
                    Ok(tx) => {
                        debug!(%market_id, tx_hash = ?tx.tx_hash, "Oracle price requested");
                        self.transition(&mut market, ResolutionState::ResolutionRequested).await?;
                    }
                    Err(e) => {
                        market.request_timestamp = None;
                        self.oracle_failed(&mut market, e).await?;
                    }
                }
            }
            ResolutionState::ResolutionRequested | ResolutionState::Proposed | ResolutionState::Disputed => {
                let query = Self::query(&market)?;
                match self.oracle.get_state(&query).await {
                    Ok(state) if state.has_price() => match self.resolve_loaded(market.clone()).await {
                        Ok(resolved) => market = resolved,
                        Err(ResolutionError::Oracle(e)) => self.oracle_failed(&mut market, e).await?,
                        Err(ResolutionError::InvalidPrice(_)) => return Ok(market.state),
                        Err(e) => return Err(e),
                    },
                    Ok(OracleRequestState::Proposed) if market.state != ResolutionState::Proposed => {
                        self.transition(&mut market, ResolutionState::Proposed).await?;
                    }
                    Ok(OracleRequestState::Disputed) if market.state != ResolutionState::Disputed => {
                        self.transition(&mut market, ResolutionState::Disputed).await?;
                    }
                    Ok(OracleRequestState::Invalid) => {
                        error!(%market_id, "Oracle has no record of the price request");
                        self.record_error(&mut market, "oracle request not found".to_string()).await?;
                    }
                    Ok(_) => {}
                    Err(e) => self.oracle_failed(&mut market, e).await?,
                }
            }
            ResolutionState::Resolved if self.config.auto_finalize => {
                match self.finalize_settlement(market_id).await {
                    Ok(finalized) => market = finalized,
                    Err(ResolutionError::UnsettledTrades { count, .. }) => {
                        debug!(%market_id, count, "Waiting for trades to settle before finalizing");
                    }
                    Err(e) => return Err(e),
                }
            }
            ResolutionState::Resolved | ResolutionState::SettledOnChain => {}
        }

        Ok(market.state)
    }

    async fn oracle_failed(&self, market: &mut Market, err: ChainError) -> Result<(), ResolutionError> {
        warn!(market_id = %market.id, state = %market.state, error = %err, "Oracle call failed");
        self.record_error(market, err.to_string()).await
    }

    /// Poll every market not yet settled on-chain. Returns how many changed state.
    pub async fn poll_all(&self) -> Result<usize, ResolutionError> {
        let markets = self.repo.list_unfinalized_markets().await?;
        let mut changed = 0;

        for market in markets {
            match self.poll_market(market.id).await {
                Ok(state) if state != market.state => changed += 1,
                Ok(_) => {}
                Err(e) => error!(market_id = %market.id, error = %e, "Failed to poll market"),
            }
        }
        Ok(changed)
    }

    /// `resolved → settled_on_chain`, only once every trade of the market is settled
    pub async fn finalize_settlement(&self, market_id: Uuid) -> Result<Market, ResolutionError> {
        let mut market = self.load(market_id).await?;
        if market.state == ResolutionState::SettledOnChain {
            return Ok(market);
        }

        let count = self.repo.count_unsettled_trades(Some(market_id)).await?;
        if count > 0 {
            return Err(ResolutionError::UnsettledTrades { market_id, count });
        }

        market.settled_at = Some(self.clock.now());
        self.transition(&mut market, ResolutionState::SettledOnChain).await?;
        Ok(market)
    }

    pub fn start_worker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let every = self.config.poll_interval;
            info!(interval_secs = every.as_secs(), "Resolution tracker started");
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_all().await {
                    error!(error = %e, "Resolution poll failed");
                }
            }
        })
    }
}
