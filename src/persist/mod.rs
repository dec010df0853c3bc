//! Persistence abstraction and SQLite implementation.

/// SQLite-backed append-only journal sink.
pub mod sqlite;

use thiserror::Error;

use crate::{core::store::StoreSnapshotV1, op::StoredOp, types::OpSeq};

/// Errors surfaced by persistence sinks.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encode/decode failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Any other sink failure.
    #[error("{0}")]
    Message(String),
}

impl From<crate::core::store::StoreError> for PersistError {
    fn from(value: crate::core::store::StoreError) -> Self {
        Self::Message(format!("store error: {value}"))
    }
}

/// Result alias for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for journaled operations.
///
/// Mutations must be durable before the corresponding change event is
/// broadcast; the runtime enqueues ops here as part of each committed
/// command and reports durability separately.
pub trait OpSink: Send {
    /// Appends ops in order, returning the highest sequence written.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;

    /// Forces buffered writes to stable storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }

    /// Records a snapshot covering every op up to `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }

    /// Drops journal rows made redundant by a snapshot.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
