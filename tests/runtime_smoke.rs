use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use pileup::{
    contact::CallsignProfile,
    core::store::{PileupStore, StoreConfig, StoreError},
    enrich::{LookupError, ProfileLookup},
    op::StoredOp,
    persist::{OpSink, PersistResult},
    runtime::{
        events::PileupEvent,
        handle::{PileupHandle, RuntimeConfig, RuntimeError, spawn_pileup},
    },
    types::OpSeq,
};

fn spawn_runtime() -> PileupHandle {
    let store = PileupStore::new(StoreConfig {
        queue_max: 4,
        worked_ttl_ms: 3_600_000,
    });
    spawn_pileup(store, None, None, RuntimeConfig::default())
}

async fn next_state_event(sub: &mut tokio::sync::broadcast::Receiver<PileupEvent>) -> PileupEvent {
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event timeout")
            .expect("recv");
        if !matches!(evt, PileupEvent::DurableUpTo { .. }) {
            return evt;
        }
    }
}

#[tokio::test]
async fn lifecycle_publishes_events_in_commit_order() {
    let handle = spawn_runtime();
    let mut sub = handle.subscribe();

    handle.set_active(true).await.expect("activate");
    assert!(matches!(
        next_state_event(&mut sub).await,
        PileupEvent::SystemStatus { settings } if settings.active
    ));
    assert!(matches!(
        next_state_event(&mut sub).await,
        PileupEvent::QueueUpdate { queue } if queue.total == 0
    ));

    handle.register("EI6LF").await.expect("register");
    match next_state_event(&mut sub).await {
        PileupEvent::QueueUpdate { queue } => {
            assert_eq!(queue.total, 1);
            assert_eq!(queue.entries[0].callsign, "EI6LF");
            assert_eq!(queue.entries[0].position, 1);
        }
        other => panic!("expected queue update, got {other:?}"),
    }

    let contact = handle.promote_next().await.expect("promote").expect("head");
    assert_eq!(contact.callsign, "EI6LF");

    // Promotion publishes the new contact before the shrunken queue.
    assert!(matches!(
        next_state_event(&mut sub).await,
        PileupEvent::CurrentQso { contact: Some(c) } if c.callsign == "EI6LF"
    ));
    assert!(matches!(
        next_state_event(&mut sub).await,
        PileupEvent::QueueUpdate { queue } if queue.total == 0
    ));

    let record = handle.complete_current().await.expect("complete");
    assert_eq!(record.callsign, "EI6LF");
    assert!(matches!(
        next_state_event(&mut sub).await,
        PileupEvent::CurrentQso { contact: None }
    ));
    assert!(matches!(
        next_state_event(&mut sub).await,
        PileupEvent::WorkedUpdate { records } if records.len() == 1
    ));

    // Completing again distinguishes "already done" from success.
    assert!(matches!(
        handle.complete_current().await,
        Err(RuntimeError::Store(StoreError::NothingActive))
    ));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn concurrent_promotes_hand_out_the_entry_exactly_once() {
    let handle = spawn_runtime();
    handle.set_active(true).await.expect("activate");
    handle.register("EI6LF").await.expect("register");

    let h1 = handle.clone();
    let h2 = handle.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { h1.promote_next().await }),
        tokio::spawn(async move { h2.promote_next().await }),
    );
    let a = a.expect("join").expect("promote");
    let b = b.expect("join").expect("promote");

    // Exactly one caller wins; the other observes an empty queue.
    assert!(a.is_some() ^ b.is_some());
    let winner = a.or(b).expect("one winner");
    assert_eq!(winner.callsign, "EI6LF");
    assert_eq!(handle.queue().await.expect("queue").total, 0);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn register_on_inactive_system_fails_without_side_effects() {
    let handle = spawn_runtime();

    assert!(matches!(
        handle.register("EI6LF").await,
        Err(RuntimeError::Store(StoreError::SystemInactive))
    ));
    assert_eq!(handle.queue().await.expect("queue").total, 0);

    handle.shutdown().await.expect("shutdown");
}

struct StaticLookup;

#[async_trait]
impl ProfileLookup for StaticLookup {
    async fn lookup(&self, callsign: &str) -> Result<CallsignProfile, LookupError> {
        if callsign == "EI6LF" {
            Ok(CallsignProfile {
                name: Some("Test Operator".to_string()),
                country: Some("Ireland".to_string()),
                ..CallsignProfile::default()
            })
        } else {
            Err(LookupError::NoProfile(callsign.to_string()))
        }
    }
}

#[tokio::test]
async fn enrichment_patches_entries_after_commit() {
    let store = PileupStore::new(StoreConfig {
        queue_max: 4,
        worked_ttl_ms: 3_600_000,
    });
    let handle = spawn_pileup(
        store,
        None,
        Some(Arc::new(StaticLookup)),
        RuntimeConfig::default(),
    );
    handle.set_active(true).await.expect("activate");
    let mut sub = handle.subscribe();

    let entry = handle.register("EI6LF").await.expect("register");
    assert!(entry.profile.is_none(), "commit must not wait for enrichment");

    // First the bare entry, then the patched one once the lookup lands.
    let mut patched = false;
    for _ in 0..6 {
        if let PileupEvent::QueueUpdate { queue } = next_state_event(&mut sub).await {
            if let Some(profile) = queue.entries.first().and_then(|e| e.profile.as_ref()) {
                assert_eq!(profile.name.as_deref(), Some("Test Operator"));
                patched = true;
                break;
            }
        }
    }
    assert!(patched, "expected an enrichment patch event");

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn failed_lookup_folds_into_profile_error() {
    let store = PileupStore::new(StoreConfig {
        queue_max: 4,
        worked_ttl_ms: 3_600_000,
    });
    let handle = spawn_pileup(
        store,
        None,
        Some(Arc::new(StaticLookup)),
        RuntimeConfig::default(),
    );
    handle.set_active(true).await.expect("activate");
    let mut sub = handle.subscribe();

    handle.register("W1ABC").await.expect("register");

    let mut errored = false;
    for _ in 0..6 {
        if let PileupEvent::QueueUpdate { queue } = next_state_event(&mut sub).await {
            if let Some(profile) = queue.entries.first().and_then(|e| e.profile.as_ref()) {
                assert!(profile.error.as_deref().is_some());
                errored = true;
                break;
            }
        }
    }
    assert!(errored, "expected the lookup failure to be merged");

    // The entry itself is untouched by the failure.
    assert_eq!(handle.queue().await.expect("queue").total, 1);

    handle.shutdown().await.expect("shutdown");
}

struct SlowSink {
    seen: Arc<Mutex<Vec<OpSeq>>>,
    delay: Duration,
}

impl OpSink for SlowSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        std::thread::sleep(self.delay);
        let mut seen = self.seen.lock().expect("lock");
        for op in ops {
            seen.push(op.seq);
        }
        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }
}

#[tokio::test]
async fn durable_event_advances_and_slow_sink_surfaces_queue_pressure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(250),
    };

    let cfg = RuntimeConfig {
        flush_on_mutate: true,
        batch_max_ops: 16,
        batch_max_latency_ms: 500,
        persist_queue_bound: 1,
        snapshot_every_ops: 0,
        compact_after_snapshot: false,
        sweep_interval_ms: 60_000,
    };

    let store = PileupStore::new(StoreConfig {
        queue_max: 32,
        worked_ttl_ms: 3_600_000,
    });
    let handle = spawn_pileup(store, Some(Box::new(sink)), None, cfg);
    let mut sub = handle.subscribe();

    handle.set_active(true).await.expect("activate");

    let mut durable_seen = false;
    for _ in 0..8 {
        let evt = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        if matches!(evt, PileupEvent::DurableUpTo { .. }) {
            durable_seen = true;
            break;
        }
    }
    assert!(durable_seen, "expected DurableUpTo event");

    let mut queue_error_seen = false;
    for i in 0..12u64 {
        let r = handle.register(format!("K{i}AA")).await;
        if let Err(RuntimeError::Persist(_)) = r {
            queue_error_seen = true;
            break;
        }
    }
    assert!(
        queue_error_seen,
        "expected persistence queue pressure to surface as error"
    );

    handle.shutdown().await.expect("shutdown");
    assert!(!seen.lock().expect("lock").is_empty());
}
