mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::*;
use polymarket_core::clock::Clock;
use polymarket_core::db::Repository;
use polymarket_core::models::{BatchStatus, OrderSide, TradeSettlementStatus};
use polymarket_core::services::settlement::{SettlementBatcher, SettlementConfig, SettlementError};

fn batcher(w: &World, repo: Arc<HookedRepository>, gateway: Arc<RecordingGateway>) -> SettlementBatcher {
    let config = SettlementConfig {
        collateral: Address::repeat_byte(0xc0),
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    };
    SettlementBatcher::new(repo, gateway, w.clock.clone(), config)
}

/// Rest a sell and lift it with `n` buys, returning the trade ids
async fn trades(w: &World, n: usize) -> Vec<Uuid> {
    w.engine
        .submit(order(&w.market, ALICE, OrderSide::Sell, dec!(0.40), dec!(100)))
        .await
        .unwrap();
    let mut ids = Vec::new();
    for _ in 0..n {
        let result = w
            .engine
            .submit(order(&w.market, BOB, OrderSide::Buy, dec!(0.40), dec!(5)))
            .await
            .unwrap();
        ids.extend(result.trades.iter().map(|t| t.id));
    }
    ids
}

#[tokio::test]
async fn two_processes_submitting_one_batch_send_once() {
    let w = world().await;
    let ids = trades(&w, 3).await;
    let gateway = Arc::new(RecordingGateway::default());

    // Separate batchers stand in for separate processes: no shared in-flight set
    let first = batcher(&w, Arc::new(HookedRepository::interleaved(w.repo.clone())), gateway.clone());
    let second = batcher(&w, Arc::new(HookedRepository::interleaved(w.repo.clone())), gateway.clone());

    let batch = first.form_batch(10).await.unwrap().unwrap();
    let (a, b) = tokio::join!(first.submit(batch.id), second.submit(batch.id));

    let (done, lost) = match (a, b) {
        (Ok(done), Err(e)) | (Err(e), Ok(done)) => (done, e),
        (a, b) => panic!("expected one winner, got {:?} and {:?}", a.map(|b| b.status), b.map(|b| b.status)),
    };
    assert_eq!(done.status, BatchStatus::Completed);
    assert!(
        matches!(lost, SettlementError::AlreadyCompleted(_) | SettlementError::InProgress(_)),
        "unexpected error: {}",
        lost
    );
    assert_eq!(gateway.fills.lock().len(), ids.len());

    for trade in w.repo.get_trades(&ids).await.unwrap() {
        assert_eq!(trade.settlement_status, TradeSettlementStatus::Settled);
        assert_eq!(trade.settlement_tx_hash, done.tx_hash);
    }
}

#[tokio::test]
async fn lost_completion_write_is_recovered_without_resending() {
    let w = world().await;
    let ids = trades(&w, 2).await;
    let gateway = Arc::new(RecordingGateway::default());
    let repo = Arc::new(HookedRepository::new(w.repo.clone()));
    let batcher = batcher(&w, repo.clone(), gateway.clone());

    repo.fail_completion.store(true, Ordering::SeqCst);
    let batch = batcher.form_batch(10).await.unwrap().unwrap();
    let err = batcher.submit(batch.id).await.unwrap_err();
    assert!(matches!(err, SettlementError::DatabaseError(_)));
    assert_eq!(gateway.fills.lock().len(), 2);

    // The receipt survived the failed completion
    let stranded = w.repo.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(stranded.status, BatchStatus::Processing);
    assert!(stranded.tx_hash.is_some());

    repo.fail_completion.store(false, Ordering::SeqCst);
    assert_eq!(batcher.recover_interrupted().await.unwrap(), 1);

    let recovered = w.repo.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, BatchStatus::Completed);
    for trade in w.repo.get_trades(&ids).await.unwrap() {
        assert_eq!(trade.settlement_status, TradeSettlementStatus::Settled);
        assert_eq!(trade.settlement_tx_hash, stranded.tx_hash);
    }

    // Nothing is left to send again
    let summary = batcher.run_once().await.unwrap();
    assert_eq!(summary.batches_completed, 0);
    assert_eq!(gateway.fills.lock().len(), 2);
}

#[tokio::test]
async fn recovery_waits_out_a_live_submission() {
    let w = world().await;
    let ids = trades(&w, 1).await;
    let repo = Arc::new(HookedRepository::new(w.repo.clone()));
    let batcher = batcher(&w, repo.clone(), Arc::new(RecordingGateway::default()));

    let mut batch = batcher.form_batch(10).await.unwrap().unwrap();
    batch.mark_processing(w.clock.now());
    assert!(w.repo.update_batch(&batch, BatchStatus::Pending).await.unwrap());

    assert_eq!(batcher.recover_interrupted().await.unwrap(), 0);
    assert_eq!(w.repo.get_trades(&ids).await.unwrap()[0].batch_id, Some(batch.id));

    let window = chrono::Duration::from_std(batcher.config().submission_window()).unwrap();
    w.clock.advance(window);
    assert_eq!(batcher.recover_interrupted().await.unwrap(), 1);

    let failed = w.repo.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    assert!(w.repo.get_trades(&ids).await.unwrap()[0].is_claimable());
}
