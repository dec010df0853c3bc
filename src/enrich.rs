//! Asynchronous callsign-profile enrichment seam.
//!
//! Lookups run outside the coordinator's critical section: entries commit
//! and broadcast with `profile = None`, and a second patch event follows
//! once the lookup resolves. A failed lookup is folded into the entry as
//! `profile.error`; it never rejects or delays the underlying operation.

use async_trait::async_trait;
use thiserror::Error;

use crate::contact::CallsignProfile;

/// Errors returned by profile lookups.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The provider had no data for the callsign.
    #[error("no profile found for {0}")]
    NoProfile(String),
    /// Transport or provider failure.
    #[error("lookup failed: {0}")]
    Failed(String),
}

/// External collaborator resolving profile metadata for a callsign.
#[async_trait]
pub trait ProfileLookup: Send + Sync + 'static {
    /// Resolves profile metadata for a normalized callsign.
    async fn lookup(&self, callsign: &str) -> Result<CallsignProfile, LookupError>;
}

/// Lookup that never resolves anything; used when no provider is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLookup;

#[async_trait]
impl ProfileLookup for NullLookup {
    async fn lookup(&self, callsign: &str) -> Result<CallsignProfile, LookupError> {
        Err(LookupError::NoProfile(callsign.to_string()))
    }
}
