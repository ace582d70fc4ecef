//! In-memory record store.
//!
//! Keeps records in a commit-ordered map guarded by a single `RwLock`.
//! Every mutation takes a fresh commit sequence number, which doubles as
//! the store's monotonic ordering for conflict resolution and fan-out.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::{RecordStore, StoreError, StoreResult, is_past_grace};
use crate::query::Matcher;
use crate::record::Record;

#[derive(Default)]
struct Inner {
    /// URI → commit sequence of the live row.
    by_uri: HashMap<String, u64>,
    /// Commit sequence → record, iterated in commit order.
    rows: BTreeMap<u64, Record>,
    seq: u64,
}

/// In-memory indexed map implementation of [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn insert(&self, record: Record) -> StoreResult<String> {
        let uri = record_uri(&record)?;
        let mut inner = self.inner.write();

        if inner.by_uri.contains_key(&uri) {
            return Err(StoreError::Duplicate(uri));
        }

        inner.seq += 1;
        let seq = inner.seq;
        inner.by_uri.insert(uri.clone(), seq);
        inner.rows.insert(seq, record);
        Ok(uri)
    }

    fn get_by_uri(&self, uri: &str) -> StoreResult<Option<Record>> {
        let inner = self.inner.read();
        Ok(inner
            .by_uri
            .get(uri)
            .and_then(|seq| inner.rows.get(seq))
            .cloned())
    }

    fn update(&self, uri: &str, record: Record) -> StoreResult<Record> {
        let mut inner = self.inner.write();

        let Some(old_seq) = inner.by_uri.get(uri).copied() else {
            return Err(StoreError::NotFound(uri.to_string()));
        };

        inner.rows.remove(&old_seq);
        inner.seq += 1;
        let seq = inner.seq;
        inner.by_uri.insert(uri.to_string(), seq);
        inner.rows.insert(seq, record.clone());
        Ok(record)
    }

    fn upsert(&self, record: Record) -> StoreResult<()> {
        let uri = record_uri(&record)?;
        let mut inner = self.inner.write();

        if let Some(old_seq) = inner.by_uri.get(&uri).copied() {
            inner.rows.remove(&old_seq);
        }
        inner.seq += 1;
        let seq = inner.seq;
        inner.by_uri.insert(uri, seq);
        inner.rows.insert(seq, record);
        Ok(())
    }

    fn delete(&self, uri: &str) -> StoreResult<Option<Record>> {
        let mut inner = self.inner.write();

        let Some(seq) = inner.by_uri.remove(uri) else {
            return Ok(None);
        };
        Ok(inner.rows.remove(&seq))
    }

    fn query(&self, matcher: &Matcher, skip: usize, limit: usize) -> StoreResult<Vec<Record>> {
        let inner = self.inner.read();
        let matched = inner
            .rows
            .values()
            .filter(|r| matcher.matches(r))
            .skip(skip);

        Ok(if limit == 0 {
            matched.cloned().collect()
        } else {
            matched.take(limit).cloned().collect()
        })
    }

    fn prune_expired(&self, now: DateTime<Utc>, threshold: Duration) -> StoreResult<Vec<Record>> {
        let mut inner = self.inner.write();

        let expired: Vec<u64> = inner
            .rows
            .iter()
            .filter(|(_, r)| is_past_grace(r, now, threshold))
            .map(|(seq, _)| *seq)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for seq in expired {
            if let Some(record) = inner.rows.remove(&seq) {
                if let Some(uri) = record.uri() {
                    inner.by_uri.remove(&uri);
                }
                removed.push(record);
            }
        }
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.inner.read().rows.len())
    }
}

fn record_uri(record: &Record) -> StoreResult<String> {
    record
        .uri()
        .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("record has no uri")))
}
