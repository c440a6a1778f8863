use bond_common::{ActivityEventType, ContractStatus, ErrorKind, ReasonCode, UserId};
use bond_engine::{BondEngine, EngineConfig};
use bond_storage::{Collection, MemoryStore};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;

fn engine_over(store: Arc<MemoryStore>) -> BondEngine {
    BondEngine::new(store, EngineConfig::default()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_signers_activate_exactly_once() {
    let engine = engine_over(Arc::new(MemoryStore::new()));
    let members: Vec<UserId> = (0..8).map(|i| UserId::new(format!("member-{}", i))).collect();

    let bond = engine.create_bond(&members[0], "Co-op").await.unwrap();
    for member in &members[1..] {
        engine.join(&bond.id, member).await.unwrap();
    }
    let contract = engine
        .propose_contract(&bond.id, &members[0], "Bylaws", "One member, one vote")
        .await
        .unwrap();

    let handles: Vec<_> = members
        .iter()
        .cloned()
        .map(|member| {
            let engine = engine.clone();
            let contract_id = contract.id;
            tokio::spawn(async move { engine.submit_signature(&contract_id, &member, None).await })
        })
        .collect();

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.activated).count(), 1);

    let view = engine.contract_status(&contract.id, &members[0]).await.unwrap();
    assert_eq!(view.contract.status, ContractStatus::Active);
    assert_eq!(view.quorum.signed.len(), members.len());

    let activity = engine.activity_for_bond(&bond.id, &members[0], None).await.unwrap();
    let activations = activity
        .iter()
        .filter(|e| e.event_type == ActivityEventType::ContractActivated)
        .count();
    let signatures = activity
        .iter()
        .filter(|e| e.event_type == ActivityEventType::SignatureSubmitted)
        .count();
    assert_eq!(activations, 1);
    assert_eq!(signatures, members.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ledger_appends_are_not_lost() {
    let engine = engine_over(Arc::new(MemoryStore::new()));
    let user = UserId::new("busy");

    let handles: Vec<_> = (1..=40i64)
        .map(|i| {
            let engine = engine.clone();
            let user = user.clone();
            let delta = if i % 4 == 0 { -i } else { i };
            tokio::spawn(async move {
                engine
                    .record(&user, delta, ReasonCode::ManualAdjustment, Utc::now())
                    .await
            })
        })
        .collect();
    for joined in join_all(handles).await {
        joined.unwrap().unwrap();
    }

    let expected: i64 = (1..=40i64).map(|i| if i % 4 == 0 { -i } else { i }).sum();
    assert_eq!(engine.balance(&user).await.unwrap(), expected);
    assert_eq!(engine.recompute_balance(&user).await.unwrap(), expected);
    assert_eq!(engine.ledger_history(&user).await.unwrap().len(), 40);
}

#[tokio::test]
async fn test_failed_evaluation_is_recovered_by_re_evaluating() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(store.clone());
    let a = UserId::new("alice");
    let c = UserId::new("carol");

    let bond = engine.create_bond(&a, "Pair").await.unwrap();
    engine.join(&bond.id, &c).await.unwrap();
    let contract = engine
        .propose_contract(&bond.id, &a, "Vows", "Always")
        .await
        .unwrap();
    engine.submit_signature(&contract.id, &a, None).await.unwrap();

    // The signature commits; the activation write fails
    store.fail_writes(Collection::Contracts, 1);
    let err = engine.submit_signature(&contract.id, &c, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);

    let view = engine.contract_status(&contract.id, &a).await.unwrap();
    assert_eq!(view.contract.status, ContractStatus::PendingSignature);
    assert!(view.quorum_satisfied);

    let outcome = engine.evaluate_quorum(&contract.id).await.unwrap();
    assert!(outcome.activated);
    assert_eq!(outcome.contract.status, ContractStatus::Active);
    assert!(!engine.evaluate_quorum(&contract.id).await.unwrap().activated);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_partial_state() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(store.clone());
    let a = UserId::new("alice");
    let bond = engine.create_bond(&a, "Solo").await.unwrap();

    store.fail_commits(1);
    let err = engine.complete_task(&bond.id, &a, "t1", 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);
    assert_eq!(engine.balance(&a).await.unwrap(), 0);
    assert!(engine
        .activity_for_bond(&bond.id, &a, None)
        .await
        .unwrap()
        .iter()
        .all(|e| e.event_type != ActivityEventType::TaskCompleted));

    // Retrying the whole operation converges
    assert_eq!(engine.complete_task(&bond.id, &a, "t1", 10).await.unwrap().balance, 10);
    assert_eq!(engine.complete_task(&bond.id, &a, "t1", 10).await.unwrap().balance, 10);
}
