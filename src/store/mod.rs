//! Record stores.
//!
//! The store is an abstract keyed collection of records. Two backends are
//! provided: an in-memory indexed map and a redb-backed persistent store.
//! Which one a deployment uses is a configuration concern; the archive
//! namespace is simply a second store instance.
//!
//! Every operation is individually atomic and conflicting writes to the
//! same URI are serialized inside the backend. Result ordering is the
//! store's commit order, which is stable across identical queries while
//! the store is unmutated.

pub mod memory;
pub mod redb;


pub use memory::MemoryStore;
pub use self::redb::RedbStore;

use chrono::{DateTime, Duration, Utc};

use crate::query::Matcher;
use crate::record::Record;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Insert found the URI already present.
    #[error("duplicate record uri: {0}")]
    Duplicate(String),

    /// Update targeted an absent URI.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Backend failure (I/O, corruption, serialization).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for crate::error::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(uri) => Self::NotFound(format!("record {uri}")),
            StoreError::Duplicate(uri) => Self::Internal(format!("duplicate record uri {uri}")),
            StoreError::Backend(e) => Self::Internal(e.to_string()),
        }
    }
}

/// Abstract keyed collection of records.
pub trait RecordStore: Send + Sync {
    /// Inserts a record under its URI. Fails with [`StoreError::Duplicate`]
    /// if the URI is already present.
    fn insert(&self, record: Record) -> StoreResult<String>;

    /// Looks a record up by URI.
    fn get_by_uri(&self, uri: &str) -> StoreResult<Option<Record>>;

    /// Atomically replaces the record stored under `uri`. Fails with
    /// [`StoreError::NotFound`] if the URI is absent.
    fn update(&self, uri: &str, record: Record) -> StoreResult<Record>;

    /// Inserts or replaces without a duplicate check. Used by the archive
    /// namespace, where a newer tombstone supersedes the older entry.
    fn upsert(&self, record: Record) -> StoreResult<()>;

    /// Atomically removes and returns the record under `uri`, if present.
    fn delete(&self, uri: &str) -> StoreResult<Option<Record>>;

    /// Returns records matching `matcher` in commit order, dropping the
    /// first `skip` matches and capping at `limit` (0 = unlimited).
    fn query(&self, matcher: &Matcher, skip: usize, limit: usize) -> StoreResult<Vec<Record>>;

    /// Removes and returns every record whose expiry plus `threshold` is
    /// before `now`. Records without an expiry stamp are left alone.
    fn prune_expired(&self, now: DateTime<Utc>, threshold: Duration) -> StoreResult<Vec<Record>>;

    /// Number of live records.
    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Whether a record is past its grace window at `now`.
pub(crate) fn is_past_grace(record: &Record, now: DateTime<Utc>, threshold: Duration) -> bool {
    match record.expires() {
        Some(expires) => expires + threshold < now,
        None => false,
    }
}
