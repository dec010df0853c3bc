use std::collections::BTreeSet;

use proptest::prelude::*;

use pileup::core::store::{PileupStore, StoreConfig};

const QUEUE_MAX: usize = 8;

#[derive(Debug, Clone)]
enum Action {
    Register { call_idx: u8 },
    Remove { call_idx: u8 },
    Promote,
    Complete,
    DirectStart { call_idx: u8 },
    SetActive { active: bool },
    ClearQueue,
    ExtendWorked { extra: u16 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..24).prop_map(|call_idx| Action::Register { call_idx }),
        (0u8..24).prop_map(|call_idx| Action::Remove { call_idx }),
        Just(Action::Promote),
        Just(Action::Complete),
        (0u8..24).prop_map(|call_idx| Action::DirectStart { call_idx }),
        any::<bool>().prop_map(|active| Action::SetActive { active }),
        Just(Action::ClearQueue),
        (1u16..5000).prop_map(|extra| Action::ExtendWorked { extra }),
    ]
}

fn call(idx: u8) -> String {
    format!("K{idx}AA")
}

fn check_invariants(store: &PileupStore, now: u64) {
    let view = store.queue_view();
    let settings = store.settings_cloned();
    let current = store.current_cloned();

    // Queue never exceeds capacity and holds no duplicate callsigns.
    assert!(view.total <= view.max);
    let calls: BTreeSet<&str> = view.entries.iter().map(|e| e.callsign.as_str()).collect();
    assert_eq!(calls.len(), view.entries.len());

    // Positions are contiguous starting at 1.
    for (idx, entry) in view.entries.iter().enumerate() {
        assert_eq!(entry.position, idx + 1);
    }

    // The active slot is never also queued.
    if let Some(current) = &current {
        assert!(!calls.contains(current.callsign.as_str()));
    }

    // An inactive system holds no queue and no active contact.
    if !settings.active {
        assert_eq!(view.total, 0);
        assert!(current.is_none());
    }

    // Reads never surface expired records.
    for rec in store.worked_live(now) {
        assert!(rec.expires_at_ms > now);
    }
}

proptest! {
    #[test]
    fn random_sequences_hold_queue_invariants_and_replay_equivalence(
        actions in prop::collection::vec(action_strategy(), 1..200),
    ) {
        let config = StoreConfig { queue_max: QUEUE_MAX, worked_ttl_ms: 10_000 };
        let mut store = PileupStore::new(config.clone());
        let mut now = 0u64;

        for action in actions {
            now += 1;
            match action {
                Action::Register { call_idx } => {
                    let _ = store.register(&call(call_idx), now);
                }
                Action::Remove { call_idx } => {
                    let _ = store.remove(&call(call_idx), now);
                }
                Action::Promote => {
                    let _ = store.promote_next(now);
                }
                Action::Complete => {
                    let _ = store.complete_current(now);
                }
                Action::DirectStart { call_idx } => {
                    let _ = store.direct_start(&call(call_idx), None, now);
                }
                Action::SetActive { active } => {
                    let _ = store.set_active(active, now);
                }
                Action::ClearQueue => {
                    let _ = store.clear_queue(now);
                }
                Action::ExtendWorked { extra } => {
                    let _ = store.extend_worked(u64::from(extra), now);
                }
            }

            check_invariants(&store, now);
        }

        // Replaying the journal into a fresh store reproduces the exact
        // aggregate state.
        let ops = store.drain_pending_ops();
        let mut replayed = PileupStore::new(config);
        for op in ops {
            replayed.apply_replayed_op(op).expect("replay");
        }

        prop_assert_eq!(replayed.queue_view(), store.queue_view());
        prop_assert_eq!(replayed.current_cloned(), store.current_cloned());
        prop_assert_eq!(replayed.settings_cloned(), store.settings_cloned());
        prop_assert_eq!(replayed.worked_live(now), store.worked_live(now));
        prop_assert_eq!(replayed.latest_op_seq(), store.latest_op_seq());
    }
}
