mod common;

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use common::*;
use polymarket_core::db::Repository;
use polymarket_core::models::order::AMOUNT_DECIMALS;
use polymarket_core::models::{Order, OrderSide, OrderStatus, ShareType, TimeInForce};
use polymarket_core::services::matching::{MatchingError, PriceLevel, SubmitResult};

#[derive(Debug, Clone)]
struct Submission {
    side: OrderSide,
    price: Decimal,
    amount: Decimal,
    tif: TimeInForce,
}

/// Any price strictly inside (0, 1), including ones finer than a price level
fn price() -> impl Strategy<Value = Decimal> {
    (1u32..=10).prop_flat_map(|scale| (1i64..10i64.pow(scale)).prop_map(move |m| Decimal::new(m, scale)))
}

/// Whole and fractional share amounts, some finer than the share precision
fn amount() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        3 => (1i64..=50).prop_map(Decimal::from),
        1 => (1i64..=50_000, 0u32..=7).prop_map(|(m, scale)| Decimal::new(m, scale)),
    ]
}

fn submission() -> impl Strategy<Value = Submission> {
    (
        prop_oneof![Just(OrderSide::Buy), Just(OrderSide::Sell)],
        price(),
        amount(),
        prop_oneof![
            6 => Just(TimeInForce::Gtc),
            1 => Just(TimeInForce::Ioc),
            1 => Just(TimeInForce::Fok),
        ],
    )
        .prop_map(|(side, price, amount, tif)| Submission { side, price, amount, tif })
}

fn to_order(w: &World, index: usize, s: &Submission) -> Order {
    let maker = format!("0x{:040x}", index + 1);
    let mut o = order(&w.market, &maker, s.side, s.price, s.amount);
    o.time_in_force = s.tif;
    o
}

fn fail(e: impl ToString) -> TestCaseError {
    TestCaseError::fail(e.to_string())
}

fn block_on<F: std::future::Future<Output = Result<(), TestCaseError>>>(f: F) -> Result<(), TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(fail)?
        .block_on(f)
}

/// Rejections a valid engine may return for a generated submission
fn check_rejection(s: &Submission, err: &MatchingError) -> Result<(), TestCaseError> {
    match err {
        MatchingError::InsufficientLiquidity => prop_assert_eq!(s.tif, TimeInForce::Fok),
        MatchingError::InvalidPrice(_) => prop_assert!(s.price.normalize().scale() > PriceLevel::DECIMALS),
        MatchingError::InvalidAmount(_) => prop_assert!(s.amount.normalize().scale() > AMOUNT_DECIMALS),
        other => return Err(fail(other)),
    }
    Ok(())
}

fn check_result(s: &Submission, result: &SubmitResult) -> Result<Decimal, TestCaseError> {
    prop_assert!(s.price.normalize().scale() <= PriceLevel::DECIMALS);
    prop_assert!(s.amount.normalize().scale() <= AMOUNT_DECIMALS);

    let filled: Decimal = result.trades.iter().map(|t| t.amount).sum();
    prop_assert_eq!(filled, result.order.filled_amount);
    prop_assert!(result.order.filled_amount <= result.order.amount);

    for trade in &result.trades {
        match s.side {
            OrderSide::Buy => prop_assert!(trade.price <= s.price, "bought at {} above limit {}", trade.price, s.price),
            OrderSide::Sell => prop_assert!(trade.price >= s.price, "sold at {} below limit {}", trade.price, s.price),
        }
    }

    match s.tif {
        TimeInForce::Fok => prop_assert_eq!(result.status(), OrderStatus::Filled),
        TimeInForce::Ioc => prop_assert!(
            result.status() != OrderStatus::Open && result.status() != OrderStatus::PartiallyFilled
        ),
        TimeInForce::Gtc => {}
    }
    Ok(filled)
}

/// Every traded share was bought by one order and sold by another
async fn check_conservation(w: &World, ids: &[Uuid], traded: Decimal) -> Result<(), TestCaseError> {
    let mut total_filled = Decimal::ZERO;
    for id in ids {
        if let Some(stored) = w.repo.get_order(*id).await.map_err(fail)? {
            prop_assert!(stored.filled_amount <= stored.amount);
            total_filled += stored.filled_amount;
        }
    }
    prop_assert_eq!(total_filled, traded * Decimal::TWO);
    Ok(())
}

fn run(submissions: Vec<Submission>) -> Result<(), TestCaseError> {
    block_on(async move {
        let w = world().await;
        let mut order_ids = Vec::new();
        let mut traded = Decimal::ZERO;

        for (i, s) in submissions.iter().enumerate() {
            let o = to_order(&w, i, s);
            order_ids.push(o.id);

            match w.engine.submit(o).await {
                Ok(result) => traded += check_result(s, &result)?,
                Err(e) => {
                    check_rejection(s, &e)?;
                    continue;
                }
            }

            let (bid, ask) = w.engine.top_of_book(w.market.id, ShareType::Yes).await;
            if let (Some(bid), Some(ask)) = (bid, ask) {
                prop_assert!(bid.price < ask.price, "crossed book: bid {} ask {}", bid.price, ask.price);
            }
        }

        check_conservation(&w, &order_ids, traded).await
    })
}

/// Rest `resting`, then submit every taker `copies` times at once
fn run_concurrent(resting: Vec<Submission>, takers: Vec<(Submission, usize)>) -> Result<(), TestCaseError> {
    block_on(async move {
        let w = interleaved_world().await;
        let mut order_ids = Vec::new();
        let mut traded = Decimal::ZERO;

        for (i, s) in resting.iter().enumerate() {
            let o = to_order(&w, i, s);
            order_ids.push(o.id);
            match w.engine.submit(o).await {
                Ok(result) => traded += check_result(s, &result)?,
                Err(e) => check_rejection(s, &e)?,
            }
        }

        let mut submits = Vec::new();
        for (i, (s, copies)) in takers.iter().enumerate() {
            let o = to_order(&w, resting.len() + i, s);
            order_ids.push(o.id);
            for _ in 0..*copies {
                submits.push(w.engine.submit(o.clone()));
            }
        }
        let results = join_all(submits).await;

        let mut accepted: HashMap<Uuid, usize> = HashMap::new();
        let mut duplicates: HashSet<Uuid> = HashSet::new();
        let mut index = 0;
        for (i, (s, copies)) in takers.iter().enumerate() {
            let id = order_ids[resting.len() + i];
            for result in &results[index..index + copies] {
                match result {
                    Ok(res) => {
                        prop_assert_eq!(res.order.id, id);
                        traded += check_result(s, res)?;
                        *accepted.entry(id).or_default() += 1;

                        let stored = w.repo.get_order(id).await.map_err(fail)?;
                        let stored = stored.ok_or_else(|| fail("accepted order not stored"))?;
                        // Later takers may have filled it further as a maker
                        prop_assert!(stored.filled_amount >= res.order.filled_amount);
                    }
                    Err(MatchingError::DuplicateOrder(dup)) => {
                        prop_assert_eq!(*dup, id);
                        duplicates.insert(id);
                    }
                    Err(e) => check_rejection(s, e)?,
                }
            }
            index += copies;
        }

        for (id, count) in &accepted {
            prop_assert_eq!(*count, 1, "order {} accepted {} times", id, count);
        }
        // A duplicate rejection implies the original went through
        for id in &duplicates {
            prop_assert!(accepted.contains_key(id), "order {} rejected as duplicate but never accepted", id);
        }

        check_conservation(&w, &order_ids, traded).await
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn matching_preserves_book_invariants(submissions in prop::collection::vec(submission(), 1..40)) {
        run(submissions)?;
    }

    #[test]
    fn concurrent_resubmits_fill_once(
        resting in prop::collection::vec(submission(), 0..15),
        takers in prop::collection::vec((submission(), 1usize..=3), 1..10),
    ) {
        run_concurrent(resting, takers)?;
    }
}
