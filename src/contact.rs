//! Domain records: queue entries, the active contact, worked history,
//! system settings, and derived views.

use serde::{Deserialize, Serialize};

use crate::types::{ContactOrigin, Disposition, TimestampMs};

/// Profile metadata attached to a callsign by the enrichment collaborator.
///
/// Every field is optional; `error` is set when the lookup failed, in which
/// case the owning entry stays fully usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CallsignProfile {
    /// Operator name, when known.
    pub name: Option<String>,
    /// Country or location text, when known.
    pub country: Option<String>,
    /// Profile image URL, when known.
    pub image_url: Option<String>,
    /// Lookup failure detail, when the enrichment call failed.
    pub error: Option<String>,
}

impl CallsignProfile {
    /// Builds a profile that records a failed lookup.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// A registered caller waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Normalized callsign, unique across the queue and the active slot.
    pub callsign: String,
    /// Registration timestamp; queue order is strict FIFO on this value.
    pub joined_at_ms: TimestampMs,
    /// Enrichment result, `None` until resolved.
    pub profile: Option<CallsignProfile>,
}

/// Frequency/mode tags an external bridge reports with a direct-start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChannelMeta {
    /// Opaque frequency display string, e.g. `14.195`.
    pub frequency_display: Option<String>,
    /// Opaque mode tag, e.g. `SSB`.
    pub mode: Option<String>,
}

/// The at-most-one in-progress contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentContact {
    /// Normalized callsign being worked.
    pub callsign: String,
    /// When the contact entered the active slot.
    pub started_at_ms: TimestampMs,
    /// Enrichment result carried over from the queue, or still pending.
    pub profile: Option<CallsignProfile>,
    /// Whether the contact came off the queue or from a bridge report.
    pub origin: ContactOrigin,
    /// Bridge-reported channel tags, when present.
    pub channel_meta: Option<ChannelMeta>,
}

/// An archived contact, visible until its retention horizon passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkedRecord {
    /// Normalized callsign that was worked.
    pub callsign: String,
    /// When the contact left the active slot.
    pub completed_at_ms: TimestampMs,
    /// Retention horizon; the record is invisible once this passes.
    pub expires_at_ms: TimestampMs,
    /// Enrichment result at archival time.
    pub profile: Option<CallsignProfile>,
    /// How the contact had entered the active slot.
    pub origin: ContactOrigin,
    /// Whether the contact completed normally or was displaced.
    pub disposition: Disposition,
}

/// Mutable operational settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Whether registrations are being accepted. Flipping this in either
    /// direction empties the queue and displaces any active contact.
    pub active: bool,
    /// Opaque operating frequency display string.
    pub frequency_display: Option<String>,
    /// Opaque split display string.
    pub split_display: Option<String>,
    /// Whether the logging-software bridge integration is enabled.
    pub integration_enabled: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            active: false,
            frequency_display: None,
            split_display: None,
            integration_enabled: false,
        }
    }
}

/// A queue entry with its derived 1-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// 1-based rank, recomputed on every read and broadcast.
    pub position: usize,
    /// Normalized callsign.
    pub callsign: String,
    /// Registration timestamp.
    pub joined_at_ms: TimestampMs,
    /// Enrichment result, `None` until resolved.
    pub profile: Option<CallsignProfile>,
}

/// Full queue state as read or broadcast: ranked entries plus capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueView {
    /// Entries in FIFO order with contiguous positions starting at 1.
    pub entries: Vec<RankedEntry>,
    /// Number of waiting callers.
    pub total: usize,
    /// Configured queue capacity.
    pub max: usize,
}

/// Consistent read of all four aggregates, for initial page loads and
/// post-reconnect resynchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Queue state.
    pub queue: QueueView,
    /// Active contact, if any.
    pub current: Option<CurrentContact>,
    /// Worked history with expired records excluded.
    pub worked: Vec<WorkedRecord>,
    /// Operational settings.
    pub settings: SystemSettings,
    /// Server clock at snapshot time, for client skew detection.
    pub server_time_ms: TimestampMs,
}
