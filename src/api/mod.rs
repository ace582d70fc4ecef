//! Service layer: the context object and the registration, edit, and
//! query services that operate on it.
//!
//! The context replaces process-wide singletons: every handler receives an
//! explicit [`ServiceContext`], and tests instantiate fresh ones.

pub mod edit;
pub mod query;
pub mod register;

use anyhow::Result as AnyResult;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{ServiceConfig, StorageBackend};
use crate::lease::LeaseManager;
use crate::store::{MemoryStore, RecordStore, RedbStore};
use crate::subscribe::SubscriptionManager;

/// Namespace prefix this cache serves; other namespaces are read-only or
/// unsupported.
pub const LOOKUP_PREFIX: &str = "lookup";

/// Everything a request handler needs, passed explicitly.
pub struct ServiceContext {
    pub store: Arc<dyn RecordStore>,
    pub archive: Arc<dyn RecordStore>,
    pub leases: LeaseManager,
    pub subscriptions: Arc<SubscriptionManager>,
    pub config: ServiceConfig,
    /// Serializes store commit + fan-out so the event order each
    /// subscription observes matches the store's commit order. Fan-out is
    /// queue appends only; nothing slow runs under this lock.
    pub(crate) commit_lock: parking_lot::Mutex<()>,
}

impl ServiceContext {
    /// Builds a context from configuration, opening the configured store
    /// backend.
    ///
    /// Returns the context together with the flush-trigger receiver to hand
    /// to [`crate::subscribe::run_flushers`].
    pub fn from_config(
        config: ServiceConfig,
    ) -> AnyResult<(Arc<Self>, mpsc::Receiver<String>)> {
        let default_ttl = config.lease.default_ttl()?;
        let max_ttl = config.lease.max_ttl()?;
        let leases = LeaseManager::new(config.lease.capacity, default_ttl, max_ttl);

        let (store, archive, persist_path): (
            Arc<dyn RecordStore>,
            Arc<dyn RecordStore>,
            Option<std::path::PathBuf>,
        ) = match config.storage.backend {
            StorageBackend::Memory => (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryStore::new()),
                None,
            ),
            StorageBackend::Persistent => {
                let data_dir = config.storage.data_dir()?;
                (
                    Arc::new(RedbStore::open(data_dir.join("records.redb"))?),
                    Arc::new(RedbStore::open(data_dir.join("archive.redb"))?),
                    Some(data_dir.join("subscriptions.redb")),
                )
            }
        };

        let (subscriptions, flush_rx) =
            SubscriptionManager::new(config.publish.clone(), persist_path.as_deref())?;

        // Adopt whatever the store already holds (restart on a persistent
        // backend) so leases and records agree from the first tick.
        leases
            .reconcile(store.as_ref())
            .map_err(|e| anyhow::anyhow!("initial lease reconciliation failed: {e}"))?;

        let ctx = Arc::new(Self {
            store,
            archive,
            leases,
            subscriptions,
            config,
            commit_lock: parking_lot::Mutex::new(()),
        });
        Ok((ctx, flush_rx))
    }

    /// Fresh in-memory context for tests.
    #[cfg(test)]
    pub(crate) fn for_tests(config: ServiceConfig) -> (Arc<Self>, mpsc::Receiver<String>) {
        let mut config = config;
        config.storage.backend = StorageBackend::Memory;
        Self::from_config(config).expect("in-memory context")
    }
}
