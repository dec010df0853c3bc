use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    callsign,
    contact::{
        CallsignProfile, ChannelMeta, CurrentContact, QueueEntry, QueueView, RankedEntry,
        StateSnapshot, SystemSettings, WorkedRecord,
    },
    op::{Op, StoredOp},
    types::{ContactOrigin, Disposition, OpSeq, TimestampMs},
};

/// Errors returned by store mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The input does not normalize to a valid amateur callsign.
    #[error("not a valid callsign: {0:?}")]
    InvalidFormat(String),
    /// The callsign is already queued or occupies the active slot.
    #[error("{0} is already registered")]
    DuplicateCallsign(String),
    /// The queue is at capacity.
    #[error("queue is full ({max} callers)")]
    QueueFull {
        /// Configured capacity.
        max: usize,
    },
    /// Registrations are not being accepted.
    #[error("system is inactive")]
    SystemInactive,
    /// The callsign is not in the queue.
    #[error("{0} is not in the queue")]
    NotFound(String),
    /// A contact is already being worked.
    #[error("a contact is already in progress")]
    ContactInProgress,
    /// No contact is being worked.
    #[error("no contact is in progress")]
    NothingActive,
}

/// Capacity and retention limits, fixed at construction.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of waiting callers.
    pub queue_max: usize,
    /// Worked-record retention horizon in milliseconds.
    pub worked_ttl_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            queue_max: 20,
            worked_ttl_ms: 60 * 60 * 1000,
        }
    }
}

/// Serialized store state for checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    /// Next operation sequence to assign.
    pub next_op_seq: OpSeq,
    /// Waiting callers in FIFO order.
    pub queue: Vec<QueueEntry>,
    /// Active contact, if any.
    pub current: Option<CurrentContact>,
    /// Worked history, including not-yet-swept expired records.
    pub worked: Vec<WorkedRecord>,
    /// Operational settings.
    pub settings: SystemSettings,
}

/// Result of installing a bridge-reported contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectStartOutcome {
    /// The installed contact.
    pub contact: CurrentContact,
    /// True when the callsign was waiting in the queue and got pulled out.
    pub was_in_queue: bool,
    /// Archived record of the contact this one displaced, if any.
    pub interrupted: Option<WorkedRecord>,
}

/// Result of flipping the active flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveChange {
    /// Settings after the call.
    pub settings: SystemSettings,
    /// False when the flag already had the requested value.
    pub changed: bool,
    /// Archived record of a contact the flip displaced, if any.
    pub displaced: Option<WorkedRecord>,
}

/// Which aggregates an enrichment merge touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileMerge {
    /// A queue entry was patched.
    pub queue_changed: bool,
    /// The active contact was patched.
    pub current_changed: bool,
}

/// Authoritative holder of the four aggregates.
///
/// All mutations go through this type, return the journaled [`StoredOp`]
/// alongside their result, and leave derived state (membership index,
/// positions) consistent. Callers pass the clock in, so retention behavior
/// is deterministic under test and replay.
#[derive(Debug, Default)]
pub struct PileupStore {
    config: StoreConfig,
    queue: Vec<QueueEntry>,
    queued_calls: HashSet<String>,
    current: Option<CurrentContact>,
    worked: Vec<WorkedRecord>,
    settings: SystemSettings,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
}

impl PileupStore {
    /// Creates an empty store with the given limits. The system starts
    /// inactive; activation is an explicit operation.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            next_op_seq: 1,
            ..Self::default()
        }
    }

    /// Rebuilds a store from a checkpoint snapshot.
    pub fn from_snapshot(config: StoreConfig, snapshot: StoreSnapshotV1) -> Self {
        let queued_calls = snapshot
            .queue
            .iter()
            .map(|e| e.callsign.clone())
            .collect();

        Self {
            config,
            queue: snapshot.queue,
            queued_calls,
            current: snapshot.current,
            worked: snapshot.worked,
            settings: snapshot.settings,
            pending_ops: Vec::new(),
            next_op_seq: snapshot.next_op_seq,
        }
    }

    /// Exports the full store state for checkpointing.
    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        StoreSnapshotV1 {
            next_op_seq: self.next_op_seq,
            queue: self.queue.clone(),
            current: self.current.clone(),
            worked: self.worked.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Appends a caller to the queue.
    pub fn register(
        &mut self,
        raw: &str,
        now: TimestampMs,
    ) -> Result<(QueueEntry, StoredOp), StoreError> {
        let call = self.normalize(raw)?;

        if !self.settings.active {
            return Err(StoreError::SystemInactive);
        }
        if self.is_registered(&call) {
            return Err(StoreError::DuplicateCallsign(call));
        }
        if self.queue.len() >= self.config.queue_max {
            return Err(StoreError::QueueFull {
                max: self.config.queue_max,
            });
        }

        let entry = QueueEntry {
            callsign: call.clone(),
            joined_at_ms: now,
            profile: None,
        };
        self.queue.push(entry.clone());
        self.queued_calls.insert(call);

        let stored = self.record(Op::Register { entry: entry.clone() }, now);
        Ok((entry, stored))
    }

    /// Removes a waiting caller without working it.
    pub fn remove(
        &mut self,
        raw: &str,
        now: TimestampMs,
    ) -> Result<(QueueEntry, StoredOp), StoreError> {
        let call = self.normalize(raw)?;
        let entry = self.take_queued(&call).ok_or(StoreError::NotFound(call))?;

        let stored = self.record(
            Op::Remove {
                callsign: entry.callsign.clone(),
            },
            now,
        );
        Ok((entry, stored))
    }

    /// Empties the queue, returning how many callers were dropped.
    pub fn clear_queue(&mut self, now: TimestampMs) -> (usize, StoredOp) {
        let count = self.queue.len();
        self.queue.clear();
        self.queued_calls.clear();
        let stored = self.record(Op::ClearQueue, now);
        (count, stored)
    }

    /// Moves the queue head into the active slot.
    ///
    /// An empty queue yields `Ok(None)` rather than an error; a non-empty
    /// queue behind an active contact is rejected, since only one contact
    /// may be worked at a time.
    pub fn promote_next(
        &mut self,
        now: TimestampMs,
    ) -> Result<Option<(CurrentContact, StoredOp)>, StoreError> {
        if self.queue.is_empty() {
            return Ok(None);
        }
        if self.current.is_some() {
            return Err(StoreError::ContactInProgress);
        }

        let entry = self.queue.remove(0);
        self.queued_calls.remove(&entry.callsign);

        let contact = CurrentContact {
            callsign: entry.callsign,
            started_at_ms: now,
            profile: entry.profile,
            origin: ContactOrigin::FromQueue,
            channel_meta: None,
        };
        self.current = Some(contact.clone());

        let stored = self.record(
            Op::Promote {
                contact: contact.clone(),
            },
            now,
        );
        Ok(Some((contact, stored)))
    }

    /// Installs a bridge-reported contact. Direct-start always wins: a
    /// queued duplicate is pulled out of the queue and an active contact is
    /// archived as interrupted, all within the same committed operation.
    pub fn direct_start(
        &mut self,
        raw: &str,
        channel_meta: Option<ChannelMeta>,
        now: TimestampMs,
    ) -> Result<(DirectStartOutcome, StoredOp), StoreError> {
        let call = self.normalize(raw)?;

        // An inactive system holds no contact state; bridge reports arriving
        // while shut down are rejected, not queued up.
        if !self.settings.active {
            return Err(StoreError::SystemInactive);
        }

        let queued = self.take_queued(&call);
        let was_in_queue = queued.is_some();
        let interrupted = self
            .current
            .take()
            .map(|c| self.archive(c, now, Disposition::Interrupted));

        let contact = CurrentContact {
            callsign: call,
            started_at_ms: now,
            profile: queued.and_then(|e| e.profile),
            origin: ContactOrigin::DirectStart,
            channel_meta,
        };
        self.current = Some(contact.clone());

        let stored = self.record(
            Op::DirectStart {
                contact: contact.clone(),
                interrupted: interrupted.clone(),
                removed_from_queue: was_in_queue,
            },
            now,
        );

        Ok((
            DirectStartOutcome {
                contact,
                was_in_queue,
                interrupted,
            },
            stored,
        ))
    }

    /// Archives the active contact as completed.
    pub fn complete_current(
        &mut self,
        now: TimestampMs,
    ) -> Result<(WorkedRecord, StoredOp), StoreError> {
        let contact = self.current.take().ok_or(StoreError::NothingActive)?;
        let record = self.archive(contact, now, Disposition::Completed);
        let stored = self.record(
            Op::Complete {
                record: record.clone(),
            },
            now,
        );
        Ok((record, stored))
    }

    /// Sets the active flag. Any edge transition empties the queue and
    /// archives an active contact as interrupted; setting the flag to its
    /// current value is a no-op that journals nothing.
    pub fn set_active(&mut self, active: bool, now: TimestampMs) -> (ActiveChange, Option<StoredOp>) {
        if self.settings.active == active {
            return (
                ActiveChange {
                    settings: self.settings.clone(),
                    changed: false,
                    displaced: None,
                },
                None,
            );
        }

        self.settings.active = active;
        self.queue.clear();
        self.queued_calls.clear();
        let displaced = self
            .current
            .take()
            .map(|c| self.archive(c, now, Disposition::Interrupted));

        let stored = self.record(
            Op::SetActive {
                active,
                displaced: displaced.clone(),
            },
            now,
        );

        (
            ActiveChange {
                settings: self.settings.clone(),
                changed: true,
                displaced,
            },
            Some(stored),
        )
    }

    /// Sets or clears the frequency display string.
    pub fn set_frequency(
        &mut self,
        frequency_display: Option<String>,
        now: TimestampMs,
    ) -> (SystemSettings, StoredOp) {
        self.settings.frequency_display = frequency_display.clone();
        let stored = self.record(Op::SetFrequency { frequency_display }, now);
        (self.settings.clone(), stored)
    }

    /// Sets or clears the split display string.
    pub fn set_split(
        &mut self,
        split_display: Option<String>,
        now: TimestampMs,
    ) -> (SystemSettings, StoredOp) {
        self.settings.split_display = split_display.clone();
        let stored = self.record(Op::SetSplit { split_display }, now);
        (self.settings.clone(), stored)
    }

    /// Toggles the logging-software bridge integration.
    pub fn set_integration(&mut self, enabled: bool, now: TimestampMs) -> (SystemSettings, StoredOp) {
        self.settings.integration_enabled = enabled;
        let stored = self.record(Op::SetIntegration { enabled }, now);
        (self.settings.clone(), stored)
    }

    /// Empties the worked history.
    pub fn clear_worked(&mut self, now: TimestampMs) -> (usize, StoredOp) {
        let count = self.worked.len();
        self.worked.clear();
        let stored = self.record(Op::ClearWorked, now);
        (count, stored)
    }

    /// Extends the retention horizon of every live worked record.
    pub fn extend_worked(&mut self, extra_ms: u64, now: TimestampMs) -> (usize, StoredOp) {
        let mut count = 0;
        for rec in &mut self.worked {
            if rec.expires_at_ms > now {
                rec.expires_at_ms = rec.expires_at_ms.saturating_add(extra_ms);
                count += 1;
            }
        }
        let stored = self.record(Op::ExtendWorked { extra_ms }, now);
        (count, stored)
    }

    /// Physically drops expired worked records. Reads already exclude them,
    /// so the sweep is housekeeping and is not journaled; replayed stores
    /// converge through the same read-side filter.
    pub fn sweep_expired(&mut self, now: TimestampMs) -> usize {
        let before = self.worked.len();
        self.worked.retain(|rec| rec.expires_at_ms > now);
        before - self.worked.len()
    }

    /// Merges an enrichment result into the queue entry and/or active
    /// contact that still carry the callsign. Journals only when something
    /// was patched.
    pub fn merge_profile(
        &mut self,
        call: &str,
        profile: CallsignProfile,
        now: TimestampMs,
    ) -> (ProfileMerge, Option<StoredOp>) {
        let mut merge = ProfileMerge::default();

        if let Some(entry) = self.queue.iter_mut().find(|e| e.callsign == call) {
            entry.profile = Some(profile.clone());
            merge.queue_changed = true;
        }
        if let Some(current) = self.current.as_mut().filter(|c| c.callsign == call) {
            current.profile = Some(profile.clone());
            merge.current_changed = true;
        }

        if !merge.queue_changed && !merge.current_changed {
            return (merge, None);
        }

        let stored = self.record(
            Op::MergeProfile {
                callsign: call.to_string(),
                profile,
            },
            now,
        );
        (merge, Some(stored))
    }

    /// Re-applies a journaled operation during replay.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        let ts = stored.ts_ms;
        match stored.op {
            Op::Register { entry } => {
                self.queued_calls.insert(entry.callsign.clone());
                self.queue.push(entry);
            }
            Op::Remove { callsign } => {
                self.take_queued(&callsign)
                    .ok_or(StoreError::NotFound(callsign))?;
            }
            Op::ClearQueue => {
                self.queue.clear();
                self.queued_calls.clear();
            }
            Op::Promote { contact } => {
                self.take_queued(&contact.callsign)
                    .ok_or_else(|| StoreError::NotFound(contact.callsign.clone()))?;
                self.current = Some(contact);
            }
            Op::DirectStart {
                contact,
                interrupted,
                removed_from_queue,
            } => {
                if removed_from_queue {
                    self.take_queued(&contact.callsign)
                        .ok_or_else(|| StoreError::NotFound(contact.callsign.clone()))?;
                }
                if let Some(rec) = interrupted {
                    self.worked.push(rec);
                }
                self.current = Some(contact);
            }
            Op::Complete { record } => {
                self.worked.push(record);
                self.current = None;
            }
            Op::SetActive { active, displaced } => {
                self.settings.active = active;
                self.queue.clear();
                self.queued_calls.clear();
                if let Some(rec) = displaced {
                    self.worked.push(rec);
                }
                self.current = None;
            }
            Op::SetFrequency { frequency_display } => {
                self.settings.frequency_display = frequency_display;
            }
            Op::SetSplit { split_display } => {
                self.settings.split_display = split_display;
            }
            Op::SetIntegration { enabled } => {
                self.settings.integration_enabled = enabled;
            }
            Op::ClearWorked => {
                self.worked.clear();
            }
            Op::ExtendWorked { extra_ms } => {
                for rec in &mut self.worked {
                    if rec.expires_at_ms > ts {
                        rec.expires_at_ms = rec.expires_at_ms.saturating_add(extra_ms);
                    }
                }
            }
            Op::MergeProfile { callsign, profile } => {
                if let Some(entry) = self.queue.iter_mut().find(|e| e.callsign == callsign) {
                    entry.profile = Some(profile.clone());
                }
                if let Some(current) = self.current.as_mut().filter(|c| c.callsign == callsign) {
                    current.profile = Some(profile);
                }
            }
        }

        self.bump_next_seq_from(stored.seq);
        Ok(())
    }

    /// Queue state with derived positions.
    pub fn queue_view(&self) -> QueueView {
        let entries = self
            .queue
            .iter()
            .enumerate()
            .map(|(idx, e)| RankedEntry {
                position: idx + 1,
                callsign: e.callsign.clone(),
                joined_at_ms: e.joined_at_ms,
                profile: e.profile.clone(),
            })
            .collect::<Vec<_>>();

        QueueView {
            total: entries.len(),
            max: self.config.queue_max,
            entries,
        }
    }

    /// Active contact, if any.
    pub fn current_cloned(&self) -> Option<CurrentContact> {
        self.current.clone()
    }

    /// Worked records still inside their retention horizon.
    pub fn worked_live(&self, now: TimestampMs) -> Vec<WorkedRecord> {
        self.worked
            .iter()
            .filter(|rec| rec.expires_at_ms > now)
            .cloned()
            .collect()
    }

    /// Operational settings.
    pub fn settings_cloned(&self) -> SystemSettings {
        self.settings.clone()
    }

    /// Consistent read of all four aggregates.
    pub fn state_snapshot(&self, now: TimestampMs) -> StateSnapshot {
        StateSnapshot {
            queue: self.queue_view(),
            current: self.current_cloned(),
            worked: self.worked_live(now),
            settings: self.settings_cloned(),
            server_time_ms: now,
        }
    }

    /// Number of waiting callers.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Takes ownership of ops journaled since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Highest sequence assigned so far.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn normalize(&self, raw: &str) -> Result<String, StoreError> {
        callsign::normalize(raw).ok_or_else(|| StoreError::InvalidFormat(raw.to_string()))
    }

    fn is_registered(&self, call: &str) -> bool {
        self.queued_calls.contains(call)
            || self.current.as_ref().is_some_and(|c| c.callsign == call)
    }

    fn take_queued(&mut self, call: &str) -> Option<QueueEntry> {
        let idx = self.queue.iter().position(|e| e.callsign == call)?;
        self.queued_calls.remove(call);
        Some(self.queue.remove(idx))
    }

    fn archive(
        &mut self,
        contact: CurrentContact,
        now: TimestampMs,
        disposition: Disposition,
    ) -> WorkedRecord {
        let record = WorkedRecord {
            callsign: contact.callsign,
            completed_at_ms: now,
            expires_at_ms: now.saturating_add(self.config.worked_ttl_ms),
            profile: contact.profile,
            origin: contact.origin,
            disposition,
        };
        self.worked.push(record.clone());
        record
    }

    fn record(&mut self, op: Op, now: TimestampMs) -> StoredOp {
        let seq = self.take_next_op_seq();
        let stored = StoredOp { seq, ts_ms: now, op };
        self.pending_ops.push(stored.clone());
        stored
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}
