use bond_common::{ReasonCode, UserId};
use bond_engine::ledger::{longest_run, streak_ending_at};
use bond_engine::{BondEngine, EngineConfig};
use bond_storage::MemoryStore;
use chrono::{Duration, NaiveDate, Utc};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn reason_for(delta: i64) -> ReasonCode {
    if delta < 0 {
        ReasonCode::RewardRedeemed
    } else {
        ReasonCode::TaskCompleted
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balance_is_order_independent(deltas in prop::collection::vec(-10_000i64..10_000, 0..40)) {
        let rt = runtime();
        let (forward, backward, recomputed) = rt.block_on(async {
            let engine = BondEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default()).unwrap();
            let fwd = UserId::new("forward");
            let bwd = UserId::new("backward");
            for delta in &deltas {
                engine.record(&fwd, *delta, reason_for(*delta), Utc::now()).await.unwrap();
            }
            for delta in deltas.iter().rev() {
                engine.record(&bwd, *delta, reason_for(*delta), Utc::now()).await.unwrap();
            }
            (
                engine.balance(&fwd).await.unwrap(),
                engine.balance(&bwd).await.unwrap(),
                engine.recompute_balance(&fwd).await.unwrap(),
            )
        });

        let expected: i64 = deltas.iter().sum();
        prop_assert_eq!(forward, expected);
        prop_assert_eq!(backward, expected);
        prop_assert_eq!(recomputed, forward);
    }

    #[test]
    fn current_streak_never_exceeds_longest(offsets in prop::collection::btree_set(0i64..60, 0..30)) {
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let dates: BTreeSet<NaiveDate> = offsets.iter().map(|d| today - Duration::days(*d)).collect();
        prop_assert!(streak_ending_at(&dates, today) <= longest_run(&dates));
    }

    #[test]
    fn unbroken_run_ending_today_counts_every_day(len in 1i64..90) {
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let dates: BTreeSet<NaiveDate> = (0..len).map(|d| today - Duration::days(d)).collect();
        prop_assert_eq!(streak_ending_at(&dates, today) as i64, len);
        prop_assert_eq!(longest_run(&dates) as i64, len);
        // Same run seen from tomorrow, before anything is logged
        let tomorrow = today + Duration::days(1);
        prop_assert_eq!(streak_ending_at(&dates, tomorrow) as i64, len);
    }
}
