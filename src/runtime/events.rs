//! Change events emitted from the single-writer coordinator loop.

use crate::{
    contact::{CurrentContact, QueueView, SystemSettings, WorkedRecord},
    types::OpSeq,
};

/// Events broadcast after every committed mutation.
///
/// Payloads carry the full post-commit state of the affected aggregate, so
/// subscribers render directly from the event without a read-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PileupEvent {
    /// The queue changed; carries the full recomputed list.
    QueueUpdate {
        /// Post-commit queue state.
        queue: QueueView,
    },
    /// The active slot changed; `None` means the slot is now empty.
    CurrentQso {
        /// Post-commit active contact.
        contact: Option<CurrentContact>,
    },
    /// The operational settings changed.
    SystemStatus {
        /// Post-commit settings.
        settings: SystemSettings,
    },
    /// The frequency display changed.
    FrequencyUpdate {
        /// New value, `None` when cleared.
        frequency_display: Option<String>,
    },
    /// The split display changed.
    SplitUpdate {
        /// New value, `None` when cleared.
        split_display: Option<String>,
    },
    /// The worked history changed; carries the live records.
    WorkedUpdate {
        /// Post-commit live worked records.
        records: Vec<WorkedRecord>,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
