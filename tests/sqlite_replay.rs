use tempfile::TempDir;

use pileup::{
    core::store::{PileupStore, StoreConfig},
    persist::{OpSink, sqlite::SqliteOpSink},
    types::Disposition,
};

fn config() -> StoreConfig {
    StoreConfig {
        queue_max: 8,
        worked_ttl_ms: 3_600_000,
    }
}

fn seeded_store() -> PileupStore {
    let mut store = PileupStore::new(config());
    store.set_active(true, 1);
    store.register("EI6LF", 2).unwrap();
    store.register("W1ABC", 3).unwrap();
    store.register("W2DEF", 4).unwrap();
    store.promote_next(5).unwrap().expect("promote");
    store.complete_current(6).unwrap();
    store.direct_start("W2DEF", None, 7).unwrap();
    store
}

#[test]
fn sqlite_replay_round_trips_all_aggregates() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("ops.db");

    let mut store = seeded_store();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");
    sink.append_ops(&store.drain_pending_ops()).expect("append");
    drop(sink);

    let sink2 = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = sink2.load_store(config()).expect("replay");

    assert_eq!(replayed.queue_view(), store.queue_view());
    assert_eq!(replayed.current_cloned(), store.current_cloned());
    assert_eq!(replayed.settings_cloned(), store.settings_cloned());
    assert_eq!(replayed.worked_live(100), store.worked_live(100));
    assert_eq!(replayed.latest_op_seq(), store.latest_op_seq());

    // The replayed active slot is the direct-start, and the completed
    // contact survives in history.
    let current = replayed.current_cloned().expect("current");
    assert_eq!(current.callsign, "W2DEF");
    let worked = replayed.worked_live(100);
    assert_eq!(worked.len(), 1);
    assert_eq!(worked[0].callsign, "EI6LF");
    assert_eq!(worked[0].disposition, Disposition::Completed);
}

#[test]
fn snapshot_plus_tail_replay_resumes_from_checkpoint() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("ops.db");

    let mut store = seeded_store();
    let mut sink = SqliteOpSink::open(&db_path).expect("open sqlite");
    sink.append_ops(&store.drain_pending_ops()).expect("append");

    // Checkpoint, compact, then keep writing.
    let last_seq = store.latest_op_seq();
    sink.write_snapshot(&store.export_snapshot(), last_seq)
        .expect("snapshot");
    let removed = SqliteOpSink::compact_through(&mut sink, last_seq).expect("compact");
    assert!(removed > 0);

    store.complete_current(10).unwrap();
    store.register("K1AAA", 11).unwrap();
    sink.append_ops(&store.drain_pending_ops()).expect("append tail");
    drop(sink);

    let sink2 = SqliteOpSink::open(&db_path).expect("reopen");
    let replayed = sink2.load_store(config()).expect("replay");

    assert_eq!(replayed.queue_view(), store.queue_view());
    assert_eq!(replayed.current_cloned(), None);
    assert_eq!(replayed.worked_live(100).len(), 2);
    assert_eq!(replayed.latest_op_seq(), store.latest_op_seq());
}

#[test]
fn empty_database_loads_a_fresh_store() {
    let tmp = TempDir::new().expect("tmp");
    let sink = SqliteOpSink::open(tmp.path().join("ops.db")).expect("open");
    let store = sink.load_store(config()).expect("load");

    assert_eq!(store.queue_len(), 0);
    assert!(store.current_cloned().is_none());
    assert!(!store.settings_cloned().active);
    assert_eq!(store.latest_op_seq(), 0);
}
