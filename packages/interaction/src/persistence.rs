//! Persistence for interactions that span many requests.
//!
//! # The Contract
//!
//! 1. **Load before replay.** Every follow-up request loads the record for its
//!    token together with the [`Revision`] it was stored at.
//!
//! 2. **Write with the loaded revision.** Every save or delete passes the
//!    revision that was loaded. A mismatch means another request touched the
//!    interaction, and the store answers [`StoreError::Conflict`].
//!
//! 3. **One transaction per request.** The updated record, or on finalization
//!    the transactional effects plus the token deletion, are written through a
//!    single [`StoreTransaction`]. Nothing is visible until `commit`.
//!
//! # What This Does NOT Guarantee
//!
//! - No TTL eviction. The backing store owns that; the service also refuses
//!   records whose `expire_at` has passed.
//! - No retries. A conflict is surfaced to the caller.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::effect::EffectAction;
use crate::envelope::Envelope;
use crate::error::ApiError;

// =============================================================================
// Store Error
// =============================================================================

/// Errors from interaction storage.
///
/// - [`StoreError::Conflict`] means another writer modified the interaction.
/// - [`StoreError::Duplicate`] means a transactional effect collided with
///   existing data (e.g. a login id taken by a concurrent signup).
/// - [`StoreError::Backend`] means storage failed (timeout, connection, etc).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer modified the interaction since we loaded it.
    #[error("revision conflict: interaction was modified concurrently")]
    Conflict,

    /// A write collided with existing data.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Storage backend failed (timeout, connection, serialization).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

// =============================================================================
// Revision
// =============================================================================

/// Revision for optimistic concurrency control.
///
/// - [`Revision::NONE`] indicates an interaction that has never been saved.
/// - After each successful save, the revision advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision {
    /// Sentinel value for an interaction that has never been saved.
    pub const NONE: Revision = Revision(0);

    pub fn next(self) -> Self {
        Revision(self.0.saturating_add(1))
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

// =============================================================================
// Interaction Record
// =============================================================================

/// Opaque handle the caller presents on every follow-up request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionToken(String);

impl InteractionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for InteractionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InteractionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for InteractionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The persisted form of one in-flight interaction.
///
/// Node envelopes are in append order. Data nodes gather in `prepare` is
/// never part of this record; it is rebuilt on every load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub token: InteractionToken,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub intent: Envelope,
    pub nodes: Vec<Envelope>,
    /// Transactional effects queued by earlier steps, run at finalization.
    #[serde(default)]
    pub pending_effects: Vec<EffectAction>,
    /// The last recoverable error, shown next to the current step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl InteractionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }
}

// =============================================================================
// Interaction Store
// =============================================================================

/// Persists interaction records across requests.
///
/// Implementations must provide atomic transactions with revision checking.
/// The engine never holds a transaction across requests.
#[async_trait]
pub trait InteractionStore: Send + Sync + 'static {
    /// Load a record.
    ///
    /// Returns `None` if the token is unknown or already evicted.
    async fn load(
        &self,
        token: &InteractionToken,
    ) -> Result<Option<(InteractionRecord, Revision)>, StoreError>;

    /// Open a transaction for the writes of one request.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// Writes staged for one request.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Save a record with optimistic concurrency control.
    ///
    /// For new records, use [`Revision::NONE`]. Returns the new revision.
    async fn save(
        &mut self,
        record: &InteractionRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError>;

    /// Delete a record, failing with `Conflict` if it moved on.
    async fn delete(
        &mut self,
        token: &InteractionToken,
        expected: Revision,
    ) -> Result<(), StoreError>;

    /// Stage a transactional effect.
    async fn execute(&mut self, effect: &EffectAction) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_display() {
        assert_eq!(Revision::NONE.to_string(), "NONE");
        assert_eq!(Revision::NONE.next().next().to_string(), "r2");
    }

    #[test]
    fn test_tokens_are_unique_and_opaque() {
        let a = InteractionToken::generate();
        let b = InteractionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_token_serializes_as_plain_string() {
        let token = InteractionToken::from("abc123");
        assert_eq!(serde_json::to_value(&token).unwrap(), "abc123");
    }
}
