//! Orderbook Implementation
//!
//! Price-time priority book for one (market, outcome). The book itself holds
//! no locks: the engine serializes all access to a book behind its mutex.
//!
//! Matching is split in two steps. [`Orderbook::plan_match`] walks the book
//! read-only and returns the fills; [`Orderbook::apply`] commits them once the
//! fills are durably recorded. A failed write leaves the book untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::warn;
use uuid::Uuid;

use super::types::*;
use crate::models::OrderSide;

type Levels = BTreeMap<PriceLevel, VecDeque<OrderEntry>>;

/// A single orderbook for a specific market outcome (Yes or No shares)
pub struct Orderbook {
    key: BookKey,

    /// Bids keyed by price, best = highest (iterate in reverse)
    bids: Levels,

    /// Asks keyed by price, best = lowest
    asks: Levels,

    /// Order ID to (side, price_level) mapping for O(log n) removal
    order_index: HashMap<Uuid, (OrderSide, PriceLevel)>,
}

impl Orderbook {
    pub fn new(key: BookKey) -> Self {
        Self {
            key,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: HashMap::new(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.order_index.len()
    }

    pub fn has_order(&self, order_id: &Uuid) -> bool {
        self.order_index.contains_key(order_id)
    }

    fn levels_mut(&mut self, side: OrderSide) -> &mut Levels {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }

    // ========================================================================
    // Top of book
    // ========================================================================

    pub fn best_bid(&self) -> Option<BookTop> {
        self.bids.iter().next_back().map(Self::top_of)
    }

    pub fn best_ask(&self) -> Option<BookTop> {
        self.asks.iter().next().map(Self::top_of)
    }

    fn top_of((level, queue): (&PriceLevel, &VecDeque<OrderEntry>)) -> BookTop {
        BookTop {
            price: level.to_decimal(),
            size: queue.iter().map(|o| o.remaining_amount).sum(),
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// A standing crossed book means a match was missed
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    pub fn delta(&self, now: DateTime<Utc>) -> BookDelta {
        BookDelta {
            market_id: self.key.market_id,
            outcome: self.key.share_type.outcome_index(),
            best_bid: self.best_bid().map(|t| t.price),
            best_ask: self.best_ask().map(|t| t.price),
            spread: self.spread(),
            timestamp: now.timestamp_millis(),
        }
    }

    // ========================================================================
    // Insert / remove
    // ========================================================================

    /// Validate price is within valid range for prediction markets (0 < price < 1)
    /// and representable as a price level without rounding
    pub fn validate_price(price: Decimal) -> Result<(), MatchingError> {
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return Err(MatchingError::InvalidPrice(format!(
                "Price {} must be between 0 and 1 (exclusive)",
                price
            )));
        }
        if price.normalize().scale() > PriceLevel::DECIMALS {
            return Err(MatchingError::InvalidPrice(format!(
                "Price {} has more than {} decimal places",
                price,
                PriceLevel::DECIMALS
            )));
        }
        Ok(())
    }

    /// Rest an order on its side of the book
    pub fn insert(&mut self, entry: OrderEntry, now: DateTime<Utc>) -> Result<(), MatchingError> {
        Self::validate_price(entry.price)?;

        if entry.remaining_amount <= Decimal::ZERO {
            return Err(MatchingError::InvalidAmount(format!(
                "Remaining amount {} must be positive",
                entry.remaining_amount
            )));
        }
        if entry.is_expired_at(now) {
            return Err(MatchingError::OrderExpired(entry.expiration));
        }
        if self.order_index.contains_key(&entry.id) {
            return Err(MatchingError::DuplicateOrder(entry.id));
        }

        let level = PriceLevel::from_decimal(entry.price);
        let side = entry.side;
        let order_id = entry.id;

        self.levels_mut(side)
            .entry(level)
            .or_default()
            .push_back(entry);
        self.order_index.insert(order_id, (side, level));

        Ok(())
    }

    /// Remove an order by ID. No-op if absent.
    pub fn remove(&mut self, order_id: Uuid) -> Option<OrderEntry> {
        let (side, level) = self.order_index.remove(&order_id)?;
        let levels = self.levels_mut(side);
        let queue = levels.get_mut(&level)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            levels.remove(&level);
        }
        entry
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Walk the opposite side for a taker without mutating the book.
    ///
    /// Levels are visited best price first and orders within a level in
    /// arrival order. Expired resting orders are skipped and reported in
    /// [`MatchPlan::expired`]. A self-match fails the whole plan unless
    /// `allow_self_trade` is set.
    pub fn plan_match(
        &self,
        side: OrderSide,
        limit_price: Decimal,
        amount: Decimal,
        taker_address: &str,
        allow_self_trade: bool,
        now: DateTime<Utc>,
    ) -> Result<MatchPlan, MatchingError> {
        let mut plan = MatchPlan {
            taker_remaining: amount,
            ..MatchPlan::default()
        };

        let levels: Box<dyn Iterator<Item = (&PriceLevel, &VecDeque<OrderEntry>)> + '_> = match side {
            OrderSide::Buy => Box::new(self.asks.iter()),
            OrderSide::Sell => Box::new(self.bids.iter().rev()),
        };

        'levels: for (_, queue) in levels {
            for maker in queue {
                if plan.taker_remaining <= Decimal::ZERO {
                    break 'levels;
                }
                // Exact prices, not the level key
                let executable = match side {
                    OrderSide::Buy => maker.price <= limit_price,
                    OrderSide::Sell => maker.price >= limit_price,
                };
                if !executable {
                    break 'levels;
                }
                if maker.is_expired_at(now) {
                    plan.expired.push(maker.id);
                    continue;
                }
                if !allow_self_trade && maker.maker.eq_ignore_ascii_case(taker_address) {
                    return Err(MatchingError::SelfTrade(taker_address.to_string()));
                }

                let fill_amount = plan.taker_remaining.min(maker.remaining_amount);
                plan.fills.push(Fill {
                    maker_order_id: maker.id,
                    maker_address: maker.maker.clone(),
                    price: maker.price,
                    amount: fill_amount,
                });
                plan.taker_remaining -= fill_amount;
            }
        }

        Ok(plan)
    }

    /// Commit a plan produced by [`plan_match`](Self::plan_match) on this book
    pub fn apply(&mut self, plan: &MatchPlan) {
        for fill in &plan.fills {
            let Some((side, level)) = self.order_index.get(&fill.maker_order_id).copied() else {
                warn!(book = %self.key, order_id = %fill.maker_order_id, "Filled maker missing from book");
                continue;
            };

            let mut exhausted = false;
            if let Some(maker) = self
                .levels_mut(side)
                .get_mut(&level)
                .and_then(|q| q.iter_mut().find(|o| o.id == fill.maker_order_id))
            {
                maker.remaining_amount -= fill.amount;
                exhausted = maker.remaining_amount <= Decimal::ZERO;
            }

            // Remove fully filled maker order
            if exhausted {
                self.remove(fill.maker_order_id);
            }
        }

        for order_id in &plan.expired {
            self.remove(*order_id);
        }
    }

    /// Remove every resting order expired at `now`
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .bids
            .values()
            .chain(self.asks.values())
            .flatten()
            .filter(|o| o.is_expired_at(now))
            .map(|o| o.id)
            .collect();

        for order_id in &expired {
            self.remove(*order_id);
        }
        expired
    }
}
