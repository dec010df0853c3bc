//! Mutation operation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    contact::{CallsignProfile, CurrentContact, QueueEntry, WorkedRecord},
    types::{OpSeq, TimestampMs},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Immutable operation appended to the journal.
///
/// Each variant carries the committed outcome rather than the request, so
/// replay is deterministic regardless of wall clock or queue order at replay
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// A caller joined the queue.
    Register {
        /// The appended entry.
        entry: QueueEntry,
    },
    /// A caller was removed from the queue without being worked.
    Remove {
        /// Normalized callsign removed.
        callsign: String,
    },
    /// The queue was emptied.
    ClearQueue,
    /// The queue head moved into the active slot.
    Promote {
        /// The installed contact.
        contact: CurrentContact,
    },
    /// A bridge-reported contact was installed, bypassing the queue.
    DirectStart {
        /// The installed contact.
        contact: CurrentContact,
        /// Archived record of a contact this one displaced, if any.
        interrupted: Option<WorkedRecord>,
        /// True when the callsign was also removed from the queue.
        removed_from_queue: bool,
    },
    /// The active contact was completed and archived.
    Complete {
        /// The archived record.
        record: WorkedRecord,
    },
    /// The active flag flipped, emptying the queue.
    SetActive {
        /// New active value.
        active: bool,
        /// Archived record of a contact the flip displaced, if any.
        displaced: Option<WorkedRecord>,
    },
    /// The frequency display changed.
    SetFrequency {
        /// New value, `None` to clear.
        frequency_display: Option<String>,
    },
    /// The split display changed.
    SetSplit {
        /// New value, `None` to clear.
        split_display: Option<String>,
    },
    /// The bridge integration toggle changed.
    SetIntegration {
        /// New value.
        enabled: bool,
    },
    /// The worked history was emptied.
    ClearWorked,
    /// Retention of live worked records was extended in bulk.
    ExtendWorked {
        /// Milliseconds added to each live record's horizon.
        extra_ms: u64,
    },
    /// An enrichment result was merged into live entries.
    MergeProfile {
        /// Normalized callsign the result belongs to.
        callsign: String,
        /// Resolved profile (possibly carrying a lookup error).
        profile: CallsignProfile,
    },
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: TimestampMs,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
