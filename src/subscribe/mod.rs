//! Subscription manager: saved queries, per-subscription queues, and
//! batched fan-out to subscriber endpoints.
//!
//! Every committed record change is evaluated against each subscription's
//! saved query in matcher-only mode. Matching records accumulate in an
//! in-memory queue per subscription and are delivered as a batch when the
//! queue reaches `max_push_events` or the subscription's push interval
//! elapses. Flushes are serialized per subscription and run on a bounded
//! worker pool so one slow subscriber cannot back-pressure writers.
//!
//! The subscription set can optionally be persisted to redb so that it
//! survives restarts; queues are in-memory only and undelivered batches are
//! lost on restart.

mod push;
mod table;

pub use table::SubscriptionTable;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use uuid::Uuid;

use crate::config::PublishSettings;
use crate::error::{Error, Result};
use crate::metrics;
use crate::query::{Matcher, Query};
use crate::record::Record;

/// Parameters for creating a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Delivery endpoint for push batches.
    pub endpoint: String,
    /// Saved query as a record-shaped document.
    pub query: Record,
    /// Per-subscription flush size; defaults to the service setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_push_events: Option<usize>,
    /// Per-subscription flush interval; defaults to the service setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_interval_secs: Option<u64>,
}

#[derive(Debug)]
struct QueueState {
    queue: VecDeque<Record>,
    last_flushed: DateTime<Utc>,
    consecutive_failures: u32,
}

/// One subscriber: a saved query, a delivery endpoint, and a queue of
/// matched records awaiting the next flush.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    endpoint: String,
    query_doc: Record,
    matcher: Matcher,
    max_push_events: usize,
    push_interval: Duration,
    state: Mutex<QueueState>,
    /// Serializes flushes: at most one concurrent flush per subscription.
    flush_gate: tokio::sync::Mutex<()>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn query_doc(&self) -> &Record {
        &self.query_doc
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        !state.queue.is_empty() && now - state.last_flushed >= self.push_interval
    }
}

/// Holds the subscription set and drives fan-out and flushing.
pub struct SubscriptionManager {
    subs: RwLock<HashMap<String, Arc<Subscription>>>,
    flush_tx: mpsc::Sender<String>,
    client: reqwest::Client,
    settings: PublishSettings,
    table: Option<SubscriptionTable>,
}

impl SubscriptionManager {
    /// Creates a manager, restoring any persisted subscriptions from
    /// `persist_path`.
    ///
    /// Returns the manager together with the flush-trigger receiver to hand
    /// to [`run_flushers`].
    pub fn new(
        settings: PublishSettings,
        persist_path: Option<&Path>,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<String>)> {
        use anyhow::Context;

        let (flush_tx, flush_rx) = mpsc::channel(settings.flush_queue_depth);
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create push HTTP client")?;

        let table = persist_path.map(SubscriptionTable::open).transpose()?;

        let manager = Self {
            subs: RwLock::new(HashMap::new()),
            flush_tx,
            client,
            settings,
            table,
        };

        if let Some(table) = &manager.table {
            for saved in table.load_all()? {
                match manager.restore(saved) {
                    Ok(id) => tracing::info!(subscription = %id, "Restored subscription"),
                    Err(e) => tracing::warn!(error = %e, "Failed to restore subscription"),
                }
            }
        }

        Ok((Arc::new(manager), flush_rx))
    }

    fn build(&self, id: String, spec: SubscriptionSpec) -> Result<Arc<Subscription>> {
        reqwest::Url::parse(&spec.endpoint)
            .map_err(|e| Error::BadRequest(format!("invalid subscription endpoint: {e}")))?;

        let query = Query::from_record(&spec.query)?;
        let max_push_events = spec
            .max_push_events
            .filter(|n| *n > 0)
            .unwrap_or(self.settings.max_push_events);
        let interval_secs = spec
            .push_interval_secs
            .filter(|n| *n > 0)
            .unwrap_or(self.settings.push_interval_secs);

        Ok(Arc::new(Subscription {
            id,
            endpoint: spec.endpoint,
            query_doc: spec.query,
            matcher: query.matcher(),
            max_push_events,
            push_interval: Duration::seconds(interval_secs as i64),
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                last_flushed: Utc::now(),
                consecutive_failures: 0,
            }),
            flush_gate: tokio::sync::Mutex::new(()),
        }))
    }

    /// Creates a subscription and persists it when a table is configured.
    pub fn subscribe(&self, spec: SubscriptionSpec) -> Result<Arc<Subscription>> {
        let id = Uuid::new_v4().to_string();
        let sub = self.build(id.clone(), spec.clone())?;

        if let Some(table) = &self.table {
            table
                .save(&id, &spec)
                .map_err(|e| Error::Internal(format!("failed to persist subscription: {e}")))?;
        }

        self.subs.write().insert(id.clone(), Arc::clone(&sub));
        tracing::info!(
            subscription = %id,
            endpoint = %sub.endpoint,
            clauses = sub.query_doc.len(),
            "Subscription created"
        );
        Ok(sub)
    }

    fn restore(&self, saved: table::SavedSubscription) -> Result<String> {
        let sub = self.build(saved.id.clone(), saved.spec)?;
        self.subs.write().insert(saved.id.clone(), sub);
        Ok(saved.id)
    }

    /// Removes a subscription. Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: &str) -> Result<bool> {
        let removed = self.subs.write().remove(id).is_some();
        if removed {
            if let Some(table) = &self.table {
                table
                    .remove(id)
                    .map_err(|e| Error::Internal(format!("failed to remove subscription: {e}")))?;
            }
            tracing::info!(subscription = %id, "Subscription removed");
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.subs.read().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.subs.read().len()
    }

    /// Routes a committed record change into every matching subscription's
    /// queue, triggering a size-driven flush where the cap is reached.
    ///
    /// Returns how many subscriptions matched.
    pub fn fan_out(&self, record: &Record) -> usize {
        let subs = self.subs.read();
        let mut matched = 0;

        for sub in subs.values() {
            if !sub.matcher.matches(record) {
                continue;
            }
            matched += 1;

            let trigger = {
                let mut state = sub.state.lock();
                state.queue.push_back(record.clone());
                state.queue.len() >= sub.max_push_events
            };
            if trigger {
                self.trigger_flush(&sub.id);
            }
        }

        if matched > 0 {
            metrics::record_fanout(matched);
        }
        matched
    }

    /// Enqueues a flush for the subscription on the bounded worker queue.
    ///
    /// A full queue is not an error: the events stay queued on the
    /// subscription and the next time-driven sweep picks them up.
    pub fn trigger_flush(&self, id: &str) {
        if let Err(e) = self.flush_tx.try_send(id.to_string()) {
            tracing::debug!(subscription = %id, error = %e, "Flush queue full, deferring");
        }
    }

    /// Subscription ids whose push interval has elapsed with events queued.
    pub fn due_flushes(&self, now: DateTime<Utc>) -> Vec<String> {
        self.subs
            .read()
            .values()
            .filter(|sub| sub.is_due(now))
            .map(|sub| sub.id.clone())
            .collect()
    }

    /// Drains and delivers the subscription's queue.
    ///
    /// A batch carries at most `max_push_events` records; anything beyond
    /// that stays queued for the next flush. The per-subscription gate
    /// serializes flushes; records fanned out while a flush is in progress
    /// ride the next one. A failed batch is retried once, then dropped;
    /// the failure counter retires the subscription at the configured
    /// threshold.
    pub async fn flush_now(&self, sub: &Arc<Subscription>) {
        let _gate = sub.flush_gate.lock().await;

        let (batch, backlog) = {
            let mut state = sub.state.lock();
            let take = state.queue.len().min(sub.max_push_events);
            let batch: Vec<Record> = state.queue.drain(..take).collect();
            (batch, state.queue.len())
        };
        if batch.is_empty() {
            return;
        }
        if backlog >= sub.max_push_events {
            self.trigger_flush(&sub.id);
        }

        let timeout = std::time::Duration::from_secs(self.settings.push_timeout_secs);
        let mut delivered = false;
        for attempt in 1..=2u32 {
            match push::deliver(&self.client, sub.endpoint(), sub.id(), &batch, timeout).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        subscription = %sub.id,
                        attempt,
                        error = %e,
                        "Push attempt failed"
                    );
                }
            }
        }

        metrics::record_flush(batch.len(), delivered);
        let now = Utc::now();

        if delivered {
            let mut state = sub.state.lock();
            state.consecutive_failures = 0;
            state.last_flushed = now;
            tracing::debug!(subscription = %sub.id, batch = batch.len(), "Batch delivered");
            return;
        }

        // Batch dropped; count the failure and retire at the threshold.
        let failures = {
            let mut state = sub.state.lock();
            state.consecutive_failures += 1;
            state.last_flushed = now;
            state.consecutive_failures
        };
        tracing::warn!(
            subscription = %sub.id,
            failures,
            dropped = batch.len(),
            "Batch dropped after retry"
        );

        if failures >= self.settings.failure_threshold {
            metrics::record_subscription_retired();
            tracing::warn!(subscription = %sub.id, "Retiring subscription after repeated failures");
            let _ = self.unsubscribe(&sub.id);
        }
    }
}

/// Runs the flush dispatcher: receives subscription ids from the trigger
/// queue and flushes them on at most `flush_workers` concurrent tasks.
///
/// Terminates when every trigger sender (the manager) is dropped.
pub fn run_flushers(
    manager: Arc<SubscriptionManager>,
    mut flush_rx: mpsc::Receiver<String>,
) -> tokio::task::JoinHandle<()> {
    let workers = manager.settings.flush_workers;
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(workers));
        while let Some(id) = flush_rx.recv().await {
            let Some(sub) = manager.get(&id) else {
                continue;
            };
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager.flush_now(&sub).await;
                drop(permit);
            });
        }
        tracing::debug!("Flush dispatcher stopped");
    })
}
