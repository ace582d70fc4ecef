//! Persistent record store backed by redb.
//!
//! Rows are serialized to JSON for human-readable debugging in the table.
//! Each row carries the commit sequence number that gives the store its
//! ordering; the counter is rebuilt from the table on open.

use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{RecordStore, StoreError, StoreResult, is_past_grace};
use crate::query::Matcher;
use crate::record::Record;

/// Table of records keyed by URI.
const RECORDS: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("records");

#[derive(Serialize, Deserialize)]
struct Row {
    seq: u64,
    record: Record,
}

/// redb-backed implementation of [`RecordStore`].
///
/// `RedbStore` is `Clone` and can be shared across threads; redb serializes
/// writers internally, which is what makes each operation atomic.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    seq: Arc<AtomicU64>,
}

impl RedbStore {
    /// Opens or creates the record database at the given path.
    ///
    /// Creates parent directories if needed and initializes the records
    /// table on first open so reads never hit a missing table.
    pub fn open<P: AsRef<Path>>(path: P) -> AnyResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let db = Database::create(path)
            .with_context(|| format!("Failed to open record database: {}", path.display()))?;

        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(RECORDS)
                .context("Failed to initialize records table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        let store = Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
        };
        store.seq.store(store.max_seq()?, Ordering::SeqCst);
        Ok(store)
    }

    fn max_seq(&self) -> AnyResult<u64> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(RECORDS)
            .context("Failed to open records table")?;

        let mut max = 0;
        for item in table.iter().context("Failed to iterate records table")? {
            let (_, value) = item.context("Failed to read record row")?;
            let row: Row = serde_json::from_slice(value.value())
                .context("Failed to deserialize record row")?;
            max = max.max(row.seq);
        }
        Ok(max)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn read_row(&self, uri: &str) -> AnyResult<Option<Row>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(RECORDS)
            .context("Failed to open records table")?;

        match table
            .get(uri)
            .with_context(|| format!("Failed to read record '{uri}'"))?
        {
            Some(guard) => {
                let row: Row = serde_json::from_slice(guard.value())
                    .with_context(|| format!("Failed to deserialize record '{uri}'"))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn write_row(&self, uri: &str, record: Record) -> AnyResult<()> {
        let row = Row {
            seq: self.next_seq(),
            record,
        };
        let encoded = serde_json::to_vec(&row).context("Failed to serialize record row")?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .context("Failed to open records table")?;
            table
                .insert(uri, encoded.as_slice())
                .with_context(|| format!("Failed to write record '{uri}'"))?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")?;
        Ok(())
    }
}

impl RecordStore for RedbStore {
    fn insert(&self, record: Record) -> StoreResult<String> {
        let uri = record
            .uri()
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("record has no uri")))?;

        // Duplicate check and insert under one write transaction: redb
        // serializes writers, so no competing insert can slip between.
        let row = Row {
            seq: self.next_seq(),
            record,
        };
        let encoded = serde_json::to_vec(&row)
            .context("Failed to serialize record row")
            .map_err(StoreError::Backend)?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")
            .map_err(StoreError::Backend)?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .context("Failed to open records table")
                .map_err(StoreError::Backend)?;

            let exists = table
                .get(uri.as_str())
                .with_context(|| format!("Failed to read record '{uri}'"))
                .map_err(StoreError::Backend)?
                .is_some();
            if exists {
                return Err(StoreError::Duplicate(uri));
            }

            table
                .insert(uri.as_str(), encoded.as_slice())
                .with_context(|| format!("Failed to insert record '{uri}'"))
                .map_err(StoreError::Backend)?;
        }
        write_txn
            .commit()
            .context("Failed to commit insert transaction")
            .map_err(StoreError::Backend)?;

        Ok(uri)
    }

    fn get_by_uri(&self, uri: &str) -> StoreResult<Option<Record>> {
        Ok(self.read_row(uri)?.map(|row| row.record))
    }

    fn update(&self, uri: &str, record: Record) -> StoreResult<Record> {
        // Existence check and replace share one write transaction so an
        // update cannot resurrect a concurrently deleted record.
        let row = Row {
            seq: self.next_seq(),
            record: record.clone(),
        };
        let encoded = serde_json::to_vec(&row)
            .context("Failed to serialize record row")
            .map_err(StoreError::Backend)?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")
            .map_err(StoreError::Backend)?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .context("Failed to open records table")
                .map_err(StoreError::Backend)?;

            let exists = table
                .get(uri)
                .with_context(|| format!("Failed to read record '{uri}'"))
                .map_err(StoreError::Backend)?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound(uri.to_string()));
            }

            table
                .insert(uri, encoded.as_slice())
                .with_context(|| format!("Failed to update record '{uri}'"))
                .map_err(StoreError::Backend)?;
        }
        write_txn
            .commit()
            .context("Failed to commit update transaction")
            .map_err(StoreError::Backend)?;

        Ok(record)
    }

    fn upsert(&self, record: Record) -> StoreResult<()> {
        let uri = record
            .uri()
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("record has no uri")))?;
        self.write_row(&uri, record)?;
        Ok(())
    }

    fn delete(&self, uri: &str) -> StoreResult<Option<Record>> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")
            .map_err(StoreError::Backend)?;

        let removed = {
            let mut table = write_txn
                .open_table(RECORDS)
                .context("Failed to open records table")
                .map_err(StoreError::Backend)?;
            table
                .remove(uri)
                .with_context(|| format!("Failed to remove record '{uri}'"))
                .map_err(StoreError::Backend)?
                .map(|guard| serde_json::from_slice::<Row>(guard.value()))
                .transpose()
                .with_context(|| format!("Failed to deserialize record '{uri}'"))
                .map_err(StoreError::Backend)?
        };

        write_txn
            .commit()
            .context("Failed to commit delete transaction")
            .map_err(StoreError::Backend)?;

        Ok(removed.map(|row| row.record))
    }

    fn query(&self, matcher: &Matcher, skip: usize, limit: usize) -> StoreResult<Vec<Record>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")
            .map_err(StoreError::Backend)?;
        let table = read_txn
            .open_table(RECORDS)
            .context("Failed to open records table")
            .map_err(StoreError::Backend)?;

        let mut matched: Vec<Row> = Vec::new();
        for item in table
            .iter()
            .context("Failed to iterate records table")
            .map_err(StoreError::Backend)?
        {
            let (_, value) = item
                .context("Failed to read record row")
                .map_err(StoreError::Backend)?;
            let row: Row = serde_json::from_slice(value.value())
                .context("Failed to deserialize record row")
                .map_err(StoreError::Backend)?;
            if matcher.matches(&row.record) {
                matched.push(row);
            }
        }

        // Table iteration is URI-ordered; results are commit-ordered.
        matched.sort_unstable_by_key(|row| row.seq);

        let paged = matched.into_iter().map(|row| row.record).skip(skip);
        Ok(if limit == 0 {
            paged.collect()
        } else {
            paged.take(limit).collect()
        })
    }

    fn prune_expired(&self, now: DateTime<Utc>, threshold: Duration) -> StoreResult<Vec<Record>> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")
            .map_err(StoreError::Backend)?;

        let mut removed = Vec::new();
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .context("Failed to open records table")
                .map_err(StoreError::Backend)?;

            let mut expired_uris = Vec::new();
            for item in table
                .iter()
                .context("Failed to iterate records table")
                .map_err(StoreError::Backend)?
            {
                let (key, value) = item
                    .context("Failed to read record row")
                    .map_err(StoreError::Backend)?;
                let row: Row = serde_json::from_slice(value.value())
                    .context("Failed to deserialize record row")
                    .map_err(StoreError::Backend)?;
                if is_past_grace(&row.record, now, threshold) {
                    expired_uris.push(key.value().to_string());
                    removed.push(row.record);
                }
            }

            for uri in expired_uris {
                table
                    .remove(uri.as_str())
                    .with_context(|| format!("Failed to remove expired record '{uri}'"))
                    .map_err(StoreError::Backend)?;
            }
        }

        write_txn
            .commit()
            .context("Failed to commit prune transaction")
            .map_err(StoreError::Backend)?;

        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")
            .map_err(StoreError::Backend)?;
        let table = read_txn
            .open_table(RECORDS)
            .context("Failed to open records table")
            .map_err(StoreError::Backend)?;
        let len = table
            .len()
            .context("Failed to count records")
            .map_err(StoreError::Backend)?;
        Ok(len as usize)
    }
}
