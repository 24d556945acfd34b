mod common;

use common::{ScriptedSource, harness};
use loyalty::application::engine::{Listing, SubmitOutcome};
use loyalty::domain::accrual::AccrualReply;
use loyalty::domain::order::{OrderNumber, OrderStatus};
use loyalty::domain::ports::OrderStore;
use loyalty::domain::user::UserId;
use loyalty::error::LoyaltyError;
use std::sync::Arc;

fn idle() -> Arc<ScriptedSource> {
    Arc::new(ScriptedSource::new(Ok(AccrualReply::NoContent)))
}

#[tokio::test]
async fn test_same_user_resubmission_is_idempotent() {
    let h = harness(idle());
    let user = UserId::new();

    assert_eq!(
        h.engine.submit_order(user, "79927398713").await.unwrap(),
        SubmitOutcome::Accepted
    );
    assert_eq!(
        h.engine.submit_order(user, "79927398713").await.unwrap(),
        SubmitOutcome::AlreadyAccepted
    );

    let Listing::Items(orders) = h.engine.orders(user).await.unwrap() else {
        panic!("expected one order");
    };
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::New);
}

#[tokio::test]
async fn test_other_user_gets_conflict_and_ownership_stays() {
    let h = harness(idle());
    let alice = UserId::new();
    let bob = UserId::new();

    h.engine.submit_order(alice, "79927398713").await.unwrap();
    assert!(matches!(
        h.engine.submit_order(bob, "79927398713").await,
        Err(LoyaltyError::ConflictError(_))
    ));

    let order = h
        .store
        .get(&OrderNumber::parse("79927398713").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.user_id, alice);
    assert_eq!(h.engine.orders(bob).await.unwrap(), Listing::Empty);
}

#[tokio::test]
async fn test_invalid_numbers_are_rejected() {
    let h = harness(idle());
    let user = UserId::new();

    for raw in [
        "79927398710",
        "1234abc",
        "",
        "12 34",
        " 79927398713",
        "79927398713\n",
        "\t79927398713 ",
    ] {
        let result = h.engine.submit_order(user, raw).await;
        assert!(
            matches!(result, Err(LoyaltyError::ValidationError(_))),
            "{raw:?} should be rejected"
        );
    }
    assert_eq!(h.engine.orders(user).await.unwrap(), Listing::Empty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_create_one_order() {
    let h = harness(idle());
    let engine = Arc::new(h.engine);
    let users: Vec<UserId> = (0..8).map(|_| UserId::new()).collect();

    let mut handles = Vec::new();
    for user in users.clone() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.submit_order(user, "4561261212345467").await
        }));
    }

    let mut accepted = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(SubmitOutcome::Accepted) => accepted += 1,
            Err(LoyaltyError::ConflictError(_)) => conflicts += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(conflicts, 7);

    let owners: usize = {
        let mut count = 0;
        for user in users {
            if let Listing::Items(orders) = engine.orders(user).await.unwrap() {
                count += orders.len();
            }
        }
        count
    };
    assert_eq!(owners, 1);
}
