//! Shared primitive types and enums.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Monotonic operation sequence number.
pub type OpSeq = u64;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// How a contact arrived in the active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactOrigin {
    /// Promoted from the head of the waiting queue.
    FromQueue,
    /// Reported already underway by an external bridge, bypassing the queue.
    DirectStart,
}

/// How a contact left the active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Worked to completion by the operator.
    Completed,
    /// Displaced by a direct-start or a system deactivation.
    Interrupted,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
