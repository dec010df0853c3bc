use std::sync::Arc;

use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    contact::{
        CallsignProfile, ChannelMeta, CurrentContact, QueueEntry, QueueView, StateSnapshot,
        SystemSettings, WorkedRecord,
    },
    core::store::{DirectStartOutcome, PileupStore, StoreError, StoreSnapshotV1},
    enrich::ProfileLookup,
    op::StoredOp,
    persist::{OpSink, PersistError},
    types::{OpSeq, TimestampMs, now_ms},
};

use super::events::PileupEvent;

/// Errors surfaced to coordinator callers.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The operation was rejected by the store.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The journaled op could not be handed to persistence.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The coordinator task is gone.
    #[error("coordinator channel closed")]
    ChannelClosed,
}

/// Knobs for the coordinator loop and its persistence worker.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Flush the journal after every staged mutation.
    pub flush_on_mutate: bool,
    /// Flush once this many ops are buffered.
    pub batch_max_ops: usize,
    /// Flush once the oldest buffered op is this old.
    pub batch_max_latency_ms: u64,
    /// Bound of the persistence queue; a full queue fails the mutation.
    pub persist_queue_bound: usize,
    /// Auto-checkpoint after this many committed ops (0 disables).
    pub snapshot_every_ops: usize,
    /// Compact the journal after each snapshot.
    pub compact_after_snapshot: bool,
    /// Cadence of the expired-worked-record sweep.
    pub sweep_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_mutate: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Cloneable handle to the single-writer coordinator.
pub struct PileupHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<PileupEvent>,
}

impl Clone for PileupHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    Register {
        callsign: String,
        resp: oneshot::Sender<Result<QueueEntry, RuntimeError>>,
    },
    Remove {
        callsign: String,
        resp: oneshot::Sender<Result<QueueEntry, RuntimeError>>,
    },
    ClearQueue {
        resp: oneshot::Sender<Result<usize, RuntimeError>>,
    },
    PromoteNext {
        resp: oneshot::Sender<Result<Option<CurrentContact>, RuntimeError>>,
    },
    DirectStart {
        callsign: String,
        channel_meta: Option<ChannelMeta>,
        resp: oneshot::Sender<Result<DirectStartOutcome, RuntimeError>>,
    },
    CompleteCurrent {
        resp: oneshot::Sender<Result<WorkedRecord, RuntimeError>>,
    },
    SetActive {
        active: bool,
        resp: oneshot::Sender<Result<SystemSettings, RuntimeError>>,
    },
    SetFrequency {
        frequency_display: Option<String>,
        resp: oneshot::Sender<Result<SystemSettings, RuntimeError>>,
    },
    SetSplit {
        split_display: Option<String>,
        resp: oneshot::Sender<Result<SystemSettings, RuntimeError>>,
    },
    SetIntegration {
        enabled: bool,
        resp: oneshot::Sender<Result<SystemSettings, RuntimeError>>,
    },
    ClearWorked {
        resp: oneshot::Sender<Result<usize, RuntimeError>>,
    },
    ExtendWorked {
        extra_ms: u64,
        resp: oneshot::Sender<Result<usize, RuntimeError>>,
    },
    MergeProfile {
        callsign: String,
        profile: CallsignProfile,
    },
    Queue {
        resp: oneshot::Sender<QueueView>,
    },
    Current {
        resp: oneshot::Sender<Option<CurrentContact>>,
    },
    Worked {
        resp: oneshot::Sender<Vec<WorkedRecord>>,
    },
    Settings {
        resp: oneshot::Sender<SystemSettings>,
    },
    Snapshot {
        resp: oneshot::Sender<StateSnapshot>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Spawns the coordinator loop and returns its handle.
///
/// The loop is the sole writer of the store: commands commit, stage the
/// journaled op to the persistence worker, and broadcast the change event,
/// in that order. Cross-aggregate operations are single commands and
/// therefore atomic with respect to every other caller.
pub fn spawn_pileup(
    store: PileupStore,
    sink: Option<Box<dyn OpSink>>,
    lookup: Option<Arc<dyn ProfileLookup>>,
    config: RuntimeConfig,
) -> PileupHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<PileupEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();
    let internal_tx = cmd_tx.downgrade();

    tokio::spawn(async move {
        let mut store = store;
        let mut ops_since_snapshot = 0usize;

        let sweep_period = Duration::from_millis(config.sweep_interval_ms.max(1000));
        let mut sweep = tokio::time::interval_at(Instant::now() + sweep_period, sweep_period);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    let done = handle_command(
                        cmd,
                        &mut store,
                        &events_tx_loop,
                        persist_tx_opt.as_ref(),
                        &config,
                        &mut ops_since_snapshot,
                        lookup.as_ref(),
                        &internal_tx,
                    ).await;

                    if done {
                        break;
                    }
                }
                durable = recv_durable(&mut durable_rx) => {
                    match durable {
                        Some(Ok(op_seq)) => {
                            let _ = events_tx_loop.send(PileupEvent::DurableUpTo { op_seq });
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "journal append failed");
                        }
                        None => {
                            durable_rx = None;
                        }
                    }
                }
                _ = sweep.tick() => {
                    let now = now_ms();
                    let removed = store.sweep_expired(now);
                    if removed > 0 {
                        debug!(removed, "swept expired worked records");
                        let _ = events_tx_loop.send(PileupEvent::WorkedUpdate {
                            records: store.worked_live(now),
                        });
                    }
                }
            }
        }
    });

    PileupHandle { cmd_tx, events_tx }
}

impl PileupHandle {
    /// Subscribes to the change-event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<PileupEvent> {
        self.events_tx.subscribe()
    }

    /// Appends a caller to the queue.
    pub async fn register(&self, callsign: impl Into<String>) -> Result<QueueEntry, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register {
                callsign: callsign.into(),
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Removes a waiting caller.
    pub async fn remove(&self, callsign: impl Into<String>) -> Result<QueueEntry, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Remove {
                callsign: callsign.into(),
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Empties the queue, returning how many callers were dropped.
    pub async fn clear_queue(&self) -> Result<usize, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ClearQueue { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Moves the queue head into the active slot; `None` when the queue is
    /// empty.
    pub async fn promote_next(&self) -> Result<Option<CurrentContact>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PromoteNext { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Installs a bridge-reported contact, displacing queue and slot state
    /// as needed.
    pub async fn direct_start(
        &self,
        callsign: impl Into<String>,
        channel_meta: Option<ChannelMeta>,
    ) -> Result<DirectStartOutcome, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::DirectStart {
                callsign: callsign.into(),
                channel_meta,
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Archives the active contact as completed.
    pub async fn complete_current(&self) -> Result<WorkedRecord, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::CompleteCurrent { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Sets the active flag, hard-resetting queue and slot on any edge.
    pub async fn set_active(&self, active: bool) -> Result<SystemSettings, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetActive { active, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Sets or clears the frequency display string.
    pub async fn set_frequency(
        &self,
        frequency_display: Option<String>,
    ) -> Result<SystemSettings, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetFrequency {
                frequency_display,
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Sets or clears the split display string.
    pub async fn set_split(
        &self,
        split_display: Option<String>,
    ) -> Result<SystemSettings, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetSplit {
                split_display,
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Toggles the logging-software bridge integration.
    pub async fn set_integration(&self, enabled: bool) -> Result<SystemSettings, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetIntegration { enabled, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Empties the worked history.
    pub async fn clear_worked(&self) -> Result<usize, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ClearWorked { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Extends retention of live worked records, returning how many were
    /// touched.
    pub async fn extend_worked(&self, extra_ms: u64) -> Result<usize, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ExtendWorked { extra_ms, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Queue state with derived positions.
    pub async fn queue(&self) -> Result<QueueView, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Queue { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Active contact, if any.
    pub async fn current(&self) -> Result<Option<CurrentContact>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Current { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Worked records still inside their retention horizon.
    pub async fn worked(&self) -> Result<Vec<WorkedRecord>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Worked { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Operational settings.
    pub async fn settings(&self) -> Result<SystemSettings, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Settings { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Consistent read of all four aggregates.
    pub async fn snapshot(&self) -> Result<StateSnapshot, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Flushes the journal, returning the highest durable sequence.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Flush { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Writes a snapshot checkpoint.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Checkpoint { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Drains persistence and stops the coordinator loop.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

async fn recv_durable(
    rx: &mut Option<mpsc::UnboundedReceiver<Result<OpSeq, PersistError>>>,
) -> Option<Result<OpSeq, PersistError>> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_command(
    cmd: Command,
    store: &mut PileupStore,
    events_tx: &broadcast::Sender<PileupEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
    lookup: Option<&Arc<dyn ProfileLookup>>,
    internal_tx: &mpsc::WeakSender<Command>,
) -> bool {
    let mut journaled = false;

    match cmd {
        Command::Register { callsign, resp } => {
            let now = now_ms();
            let res = store
                .register(&callsign, now)
                .map_err(RuntimeError::from)
                .and_then(|(entry, stored)| {
                    stage_op(persist_tx, events_tx, store, stored)?;
                    publish_queue(store, events_tx);
                    Ok(entry)
                });
            if let Ok(entry) = &res {
                journaled = true;
                dispatch_lookup(lookup, internal_tx, &entry.callsign);
            }
            let _ = resp.send(res);
        }
        Command::Remove { callsign, resp } => {
            let now = now_ms();
            let res = store
                .remove(&callsign, now)
                .map_err(RuntimeError::from)
                .and_then(|(entry, stored)| {
                    stage_op(persist_tx, events_tx, store, stored)?;
                    publish_queue(store, events_tx);
                    Ok(entry)
                });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::ClearQueue { resp } => {
            let (count, stored) = store.clear_queue(now_ms());
            let res = stage_op(persist_tx, events_tx, store, stored).map(|_| {
                publish_queue(store, events_tx);
                count
            });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::PromoteNext { resp } => {
            let res = match store.promote_next(now_ms()) {
                Ok(None) => Ok(None),
                Ok(Some((contact, stored))) => {
                    stage_op(persist_tx, events_tx, store, stored).map(|_| {
                        journaled = true;
                        publish_current(store, events_tx);
                        publish_queue(store, events_tx);
                        Some(contact)
                    })
                }
                Err(err) => Err(RuntimeError::from(err)),
            };
            let _ = resp.send(res);
        }
        Command::DirectStart {
            callsign,
            channel_meta,
            resp,
        } => {
            let now = now_ms();
            let res = store
                .direct_start(&callsign, channel_meta, now)
                .map_err(RuntimeError::from)
                .and_then(|(outcome, stored)| {
                    stage_op(persist_tx, events_tx, store, stored)?;
                    publish_current(store, events_tx);
                    if outcome.was_in_queue {
                        publish_queue(store, events_tx);
                    }
                    if outcome.interrupted.is_some() {
                        publish_worked(store, events_tx, now);
                    }
                    Ok(outcome)
                });
            if let Ok(outcome) = &res {
                journaled = true;
                if outcome.contact.profile.is_none() {
                    dispatch_lookup(lookup, internal_tx, &outcome.contact.callsign);
                }
            }
            let _ = resp.send(res);
        }
        Command::CompleteCurrent { resp } => {
            let now = now_ms();
            let res = store
                .complete_current(now)
                .map_err(RuntimeError::from)
                .and_then(|(record, stored)| {
                    stage_op(persist_tx, events_tx, store, stored)?;
                    publish_current(store, events_tx);
                    publish_worked(store, events_tx, now);
                    Ok(record)
                });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::SetActive { active, resp } => {
            let now = now_ms();
            let (change, maybe_stored) = store.set_active(active, now);
            let res = match maybe_stored {
                None => Ok(change.settings),
                Some(stored) => stage_op(persist_tx, events_tx, store, stored).map(|_| {
                    journaled = true;
                    publish_status(store, events_tx);
                    publish_queue(store, events_tx);
                    if change.displaced.is_some() {
                        publish_current(store, events_tx);
                        publish_worked(store, events_tx, now);
                    }
                    change.settings
                }),
            };
            let _ = resp.send(res);
        }
        Command::SetFrequency {
            frequency_display,
            resp,
        } => {
            let (settings, stored) = store.set_frequency(frequency_display, now_ms());
            let res = stage_op(persist_tx, events_tx, store, stored).map(|_| {
                let _ = events_tx.send(PileupEvent::FrequencyUpdate {
                    frequency_display: settings.frequency_display.clone(),
                });
                settings
            });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::SetSplit {
            split_display,
            resp,
        } => {
            let (settings, stored) = store.set_split(split_display, now_ms());
            let res = stage_op(persist_tx, events_tx, store, stored).map(|_| {
                let _ = events_tx.send(PileupEvent::SplitUpdate {
                    split_display: settings.split_display.clone(),
                });
                settings
            });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::SetIntegration { enabled, resp } => {
            let (settings, stored) = store.set_integration(enabled, now_ms());
            let res = stage_op(persist_tx, events_tx, store, stored).map(|_| {
                publish_status(store, events_tx);
                settings
            });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::ClearWorked { resp } => {
            let now = now_ms();
            let (count, stored) = store.clear_worked(now);
            let res = stage_op(persist_tx, events_tx, store, stored).map(|_| {
                publish_worked(store, events_tx, now);
                count
            });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::ExtendWorked { extra_ms, resp } => {
            let now = now_ms();
            let (count, stored) = store.extend_worked(extra_ms, now);
            let res = stage_op(persist_tx, events_tx, store, stored).map(|_| {
                publish_worked(store, events_tx, now);
                count
            });
            journaled = res.is_ok();
            let _ = resp.send(res);
        }
        Command::MergeProfile { callsign, profile } => {
            let (merge, maybe_stored) = store.merge_profile(&callsign, profile, now_ms());
            if let Some(stored) = maybe_stored {
                match stage_op(persist_tx, events_tx, store, stored) {
                    Ok(()) => {
                        journaled = true;
                        if merge.queue_changed {
                            publish_queue(store, events_tx);
                        }
                        if merge.current_changed {
                            publish_current(store, events_tx);
                        }
                    }
                    Err(err) => warn!(%callsign, error = %err, "profile merge not journaled"),
                }
            }
        }
        Command::Queue { resp } => {
            let _ = resp.send(store.queue_view());
        }
        Command::Current { resp } => {
            let _ = resp.send(store.current_cloned());
        }
        Command::Worked { resp } => {
            let _ = resp.send(store.worked_live(now_ms()));
        }
        Command::Settings { resp } => {
            let _ = resp.send(store.settings_cloned());
        }
        Command::Snapshot { resp } => {
            let _ = resp.send(store.state_snapshot(now_ms()));
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(store.latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Checkpoint { resp } => {
            let out = if let Some(tx) = persist_tx {
                let snapshot = store.export_snapshot();
                let last_seq = store.latest_op_seq();
                let (cp_tx, cp_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Checkpoint {
                        snapshot,
                        last_seq,
                        compact: config.compact_after_snapshot,
                        resp: cp_tx,
                    })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    cp_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    match done_rx.await {
                        Ok(()) => Ok(()),
                        Err(_) => Err(RuntimeError::ChannelClosed),
                    }
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    if journaled {
        *ops_since_snapshot += 1;
        maybe_auto_checkpoint(store, persist_tx, config, ops_since_snapshot).await;
    }

    false
}

fn publish_queue(store: &PileupStore, events_tx: &broadcast::Sender<PileupEvent>) {
    let _ = events_tx.send(PileupEvent::QueueUpdate {
        queue: store.queue_view(),
    });
}

fn publish_current(store: &PileupStore, events_tx: &broadcast::Sender<PileupEvent>) {
    let _ = events_tx.send(PileupEvent::CurrentQso {
        contact: store.current_cloned(),
    });
}

fn publish_status(store: &PileupStore, events_tx: &broadcast::Sender<PileupEvent>) {
    let _ = events_tx.send(PileupEvent::SystemStatus {
        settings: store.settings_cloned(),
    });
}

fn publish_worked(
    store: &PileupStore,
    events_tx: &broadcast::Sender<PileupEvent>,
    now: TimestampMs,
) {
    let _ = events_tx.send(PileupEvent::WorkedUpdate {
        records: store.worked_live(now),
    });
}

fn dispatch_lookup(
    lookup: Option<&Arc<dyn ProfileLookup>>,
    internal_tx: &mpsc::WeakSender<Command>,
    callsign: &str,
) {
    let Some(lookup) = lookup else {
        return;
    };
    let lookup = Arc::clone(lookup);
    let internal_tx = internal_tx.clone();
    let callsign = callsign.to_string();

    tokio::spawn(async move {
        let profile = match lookup.lookup(&callsign).await {
            Ok(profile) => profile,
            Err(err) => CallsignProfile::from_error(err.to_string()),
        };
        if let Some(tx) = internal_tx.upgrade() {
            let _ = tx.send(Command::MergeProfile { callsign, profile }).await;
        }
    });
}

fn stage_op(
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    events_tx: &broadcast::Sender<PileupEvent>,
    store: &PileupStore,
    stored: StoredOp,
) -> Result<(), RuntimeError> {
    if let Some(tx) = persist_tx {
        tx.try_send(PersistMsg::Op(stored)).map_err(|err| {
            RuntimeError::Persist(PersistError::Message(format!("persist queue error: {err}")))
        })
    } else {
        let _ = events_tx.send(PileupEvent::DurableUpTo {
            op_seq: store.latest_op_seq(),
        });
        Ok(())
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Op(stored) => {
                            buf.push(stored);

                            if buf.len() >= config.batch_max_ops || config.flush_on_mutate {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let flush_result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let result = if let Err(err) = flush_result {
                                Err(err)
                            } else {
                                let sink_ref = Arc::clone(&sink);
                                match tokio::task::spawn_blocking(move || {
                                    let mut sink = sink_ref.blocking_lock();
                                    sink.write_snapshot(&snapshot, last_seq)?;
                                    if compact {
                                        let _ = sink.compact_through(last_seq)?;
                                    }
                                    Result::<(), PersistError>::Ok(())
                                }).await {
                                    Ok(inner) => inner,
                                    Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let ops = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<OpSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_ops(&ops)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}

async fn maybe_auto_checkpoint(
    store: &PileupStore,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) {
    if config.snapshot_every_ops == 0 || *ops_since_snapshot < config.snapshot_every_ops {
        return;
    }

    let Some(tx) = persist_tx else {
        return;
    };

    let snapshot = store.export_snapshot();
    let last_seq = store.latest_op_seq();
    let (cp_tx, cp_rx) = oneshot::channel();
    if tx
        .send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .is_ok()
    {
        let _ = cp_rx.await;
        *ops_since_snapshot = 0;
    }
}
