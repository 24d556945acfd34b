mod common;

use common::{
    BlockingSource, ScriptedSource, harness, harness_with, invalid, processed, rate_limited,
};
use loyalty::application::accrual_client::AccrualClientConfig;
use loyalty::domain::account::Points;
use loyalty::domain::accrual::{AccrualError, AccrualReply};
use loyalty::domain::order::{OrderNumber, OrderStatus};
use loyalty::domain::ports::OrderStore;
use loyalty::domain::user::UserId;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const NUMBER: &str = "79927398713";

fn number() -> OrderNumber {
    OrderNumber::parse(NUMBER).unwrap()
}

#[tokio::test]
async fn test_processed_order_converges_and_funds_balance() {
    let source = Arc::new(ScriptedSource::new(processed(NUMBER, dec!(12.5))));
    let h = harness(source.clone());
    let user = UserId::new();
    h.engine.submit_order(user, NUMBER).await.unwrap();

    let report = h.reconciler.run_tick().await.unwrap();
    assert_eq!(report.settled, 1);

    let order = h.store.get(&number()).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processed);
    assert_eq!(order.accrual, Points::new(dec!(12.5)));
    assert_eq!(
        h.engine.balance(user).await.unwrap().current,
        Points::new(dec!(12.5))
    );
}

#[tokio::test]
async fn test_rate_limit_pauses_all_queries() {
    let source = Arc::new(
        ScriptedSource::new(processed(NUMBER, dec!(5))).then(rate_limited(60)),
    );
    let h = harness(source.clone());
    let user = UserId::new();
    h.engine.submit_order(user, NUMBER).await.unwrap();

    h.reconciler.run_tick().await.unwrap();
    assert_eq!(source.calls(), 1);
    assert_eq!(
        h.store.get(&number()).await.unwrap().unwrap().status,
        OrderStatus::Processing
    );

    for _ in 0..5 {
        h.clock.advance(Duration::from_secs(10));
        let report = h.reconciler.run_tick().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(source.calls(), 1, "no query may be issued during the cooldown");
        assert_eq!(
            h.store.get(&number()).await.unwrap().unwrap().status,
            OrderStatus::Processing
        );
    }

    h.clock.advance(Duration::from_secs(10));
    let report = h.reconciler.run_tick().await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_terminal_orders_are_left_alone() {
    let source = Arc::new(ScriptedSource::new(processed(NUMBER, dec!(99))).then(invalid(NUMBER)));
    let h = harness(source.clone());
    let user = UserId::new();
    h.engine.submit_order(user, NUMBER).await.unwrap();

    h.reconciler.run_tick().await.unwrap();
    let settled = h.store.get(&number()).await.unwrap().unwrap();
    assert_eq!(settled.status, OrderStatus::Invalid);
    assert_eq!(settled.accrual, Points::ZERO);

    for _ in 0..3 {
        let report = h.reconciler.run_tick().await.unwrap();
        assert_eq!(report.examined, 0);
    }
    assert_eq!(source.calls(), 1);
    assert_eq!(h.store.get(&number()).await.unwrap().unwrap(), settled);
    assert_eq!(h.engine.balance(user).await.unwrap().current, Points::ZERO);
}

#[tokio::test]
async fn test_failures_and_unknown_results_keep_order_processing() {
    let source = Arc::new(
        ScriptedSource::new(Ok(AccrualReply::NoContent))
            .then(Err(AccrualError::Transport("connection refused".to_string())))
            .then(Err(AccrualError::UnexpectedStatus {
                status: 500,
                message: "boom".to_string(),
            })),
    );
    let h = harness(source.clone());
    h.engine.submit_order(UserId::new(), NUMBER).await.unwrap();

    let first = h.reconciler.run_tick().await.unwrap();
    assert_eq!(first.failed, 1);
    let second = h.reconciler.run_tick().await.unwrap();
    assert_eq!(second.failed, 1);
    let third = h.reconciler.run_tick().await.unwrap();
    assert_eq!(third.pending, 1);

    let order = h.store.get(&number()).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.accrual, Points::ZERO);
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn test_timeout_is_a_failure() {
    let source = Arc::new(BlockingSource::default());
    let h = harness_with(
        source,
        AccrualClientConfig {
            request_timeout: Duration::from_millis(50),
            ..AccrualClientConfig::default()
        },
    );
    h.engine.submit_order(UserId::new(), NUMBER).await.unwrap();

    let report = h.reconciler.run_tick().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(
        h.store.get(&number()).await.unwrap().unwrap().status,
        OrderStatus::Processing
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_tick_is_skipped() {
    let source = Arc::new(BlockingSource::default());
    let h = harness(source.clone());
    h.engine.submit_order(UserId::new(), NUMBER).await.unwrap();

    let reconciler = h.reconciler.clone();
    let in_flight = tokio::spawn(async move { reconciler.run_tick().await });
    source.entered.notified().await;

    let report = h.reconciler.run_tick().await.unwrap();
    assert!(report.skipped);

    in_flight.abort();
    let _ = in_flight.await;

    // The aborted pass released the interlock.
    let report = tokio::time::timeout(Duration::from_millis(100), h.reconciler.run_tick()).await;
    assert!(report.is_err(), "a fresh pass should start and block on the source again");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_returns_while_query_hangs() {
    let source = Arc::new(BlockingSource::default());
    let h = harness(source.clone());
    h.engine.submit_order(UserId::new(), NUMBER).await.unwrap();

    let handle = h.reconciler.clone().spawn();
    source.entered.notified().await;

    tokio::time::timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("stop must not wait for the hanging query")
        .unwrap();

    let order = h.store.get(&number()).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
}

#[tokio::test]
async fn test_spawned_worker_settles_new_submissions() {
    let source = Arc::new(ScriptedSource::new(processed(NUMBER, dec!(40))));
    let h = harness(source);
    let user = UserId::new();

    let handle = h.reconciler.clone().spawn();
    h.engine.submit_order(user, NUMBER).await.unwrap();

    let mut settled = false;
    for _ in 0..100 {
        if h.store.get(&number()).await.unwrap().unwrap().status == OrderStatus::Processed {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop().await.unwrap();

    assert!(settled);
    assert_eq!(
        h.engine.balance(user).await.unwrap().current,
        Points::new(dec!(40))
    );
}
