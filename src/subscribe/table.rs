//! Durable subscription set.
//!
//! Persists subscriptions (not their queues) to a redb table so the set
//! survives process restarts. Rows are JSON for debuggability, matching
//! the record store's encoding.

use anyhow::{Context, Result};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::SubscriptionSpec;

const SUBSCRIPTIONS: TableDefinition<'static, &'static str, &'static [u8]> =
    TableDefinition::new("subscriptions");

/// One persisted subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct SavedSubscription {
    pub id: String,
    #[serde(flatten)]
    pub spec: SubscriptionSpec,
}

/// redb-backed table of subscriptions.
#[derive(Clone)]
pub struct SubscriptionTable {
    db: Arc<Database>,
}

impl SubscriptionTable {
    /// Opens or creates the subscription database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create subscription directory: {}",
                    parent.display()
                )
            })?;
        }

        let db = Database::create(path).with_context(|| {
            format!("Failed to open subscription database: {}", path.display())
        })?;

        let write_txn = db
            .begin_write()
            .context("Failed to begin initialization transaction")?;
        {
            let _table = write_txn
                .open_table(SUBSCRIPTIONS)
                .context("Failed to initialize subscriptions table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(super) fn save(&self, id: &str, spec: &SubscriptionSpec) -> Result<()> {
        let row = SavedSubscription {
            id: id.to_string(),
            spec: spec.clone(),
        };
        let encoded = serde_json::to_vec(&row).context("Failed to serialize subscription")?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(SUBSCRIPTIONS)
                .context("Failed to open subscriptions table")?;
            table
                .insert(id, encoded.as_slice())
                .with_context(|| format!("Failed to save subscription '{id}'"))?;
        }
        write_txn
            .commit()
            .context("Failed to commit subscription save")?;
        Ok(())
    }

    pub(super) fn remove(&self, id: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(SUBSCRIPTIONS)
                .context("Failed to open subscriptions table")?;
            table
                .remove(id)
                .with_context(|| format!("Failed to remove subscription '{id}'"))?;
        }
        write_txn
            .commit()
            .context("Failed to commit subscription removal")?;
        Ok(())
    }

    pub(super) fn load_all(&self) -> Result<Vec<SavedSubscription>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(SUBSCRIPTIONS)
            .context("Failed to open subscriptions table")?;

        let mut out = Vec::new();
        for item in table
            .iter()
            .context("Failed to iterate subscriptions table")?
        {
            let (_, value) = item.context("Failed to read subscription row")?;
            let saved: SavedSubscription = serde_json::from_slice(value.value())
                .context("Failed to deserialize subscription row")?;
            out.push(saved);
        }
        Ok(out)
    }
}
