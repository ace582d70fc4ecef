//! Maintenance scheduler.
//!
//! A minimal periodic driver with one task per job category: expiry
//! pruning, time-driven subscription flushes, and memory hygiene. Jobs run
//! serially within a category and in parallel across categories. Missed
//! fires coalesce: each interval skips straight to the next tick instead
//! of replaying a backlog.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration as StdDuration, MissedTickBehavior, interval};

use crate::api::ServiceContext;
use crate::metrics;
use crate::record::RecordState;

/// Handle over the running maintenance tasks.
pub struct MaintenanceScheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl MaintenanceScheduler {
    /// Spawns the maintenance tasks with the context's configured cadence.
    pub fn start(ctx: Arc<ServiceContext>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = ctx.config.maintenance.clone();

        let handles = vec![
            spawn_job(
                "prune",
                settings.prune_interval_secs,
                shutdown_rx.clone(),
                Arc::clone(&ctx),
                |ctx| run_prune(&ctx),
            ),
            spawn_job(
                "flush",
                settings.flush_check_secs,
                shutdown_rx.clone(),
                Arc::clone(&ctx),
                |ctx| run_flush_sweep(&ctx),
            ),
            spawn_job(
                "hygiene",
                settings.hygiene_interval_secs,
                shutdown_rx,
                ctx,
                |ctx| run_hygiene(&ctx),
            ),
        ];

        tracing::info!("Maintenance scheduler started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Stops all maintenance tasks and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("Maintenance scheduler stopped");
    }
}

fn spawn_job(
    name: &'static str,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
    ctx: Arc<ServiceContext>,
    job: fn(Arc<ServiceContext>),
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(StdDuration::from_secs(interval_secs.max(1)));
        // One catch-up fire after a stall, not N.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => job(Arc::clone(&ctx)),
                _ = shutdown_rx.changed() => {
                    tracing::debug!(job = name, "Maintenance task shutting down");
                    break;
                }
            }
        }
    })
}

/// Removes expired records, tombstones them, releases their leases, fans
/// the expiry out to subscribers, and reconciles the lease index.
fn run_prune(ctx: &ServiceContext) {
    let threshold = Duration::seconds(ctx.config.maintenance.prune_threshold_secs as i64);

    let removed = match ctx.store.prune_expired(Utc::now(), threshold) {
        Ok(removed) => removed,
        Err(e) => {
            tracing::error!(error = %e, "Prune sweep failed");
            return;
        }
    };

    let count = removed.len();
    for mut record in removed {
        record.set_state(RecordState::Expired);
        if let Some(uri) = record.uri() {
            ctx.leases.release_lease(&uri);
        }
        if let Err(e) = ctx.archive.upsert(record.clone()) {
            tracing::warn!(error = %e, "Failed to archive expired record");
        }
        metrics::record_record_event("expired");
        let _commit = ctx.commit_lock.lock();
        ctx.subscriptions.fan_out(&record);
    }

    if count > 0 {
        metrics::record_prune(count);
        tracing::info!(count, "Pruned expired records");
    }

    if let Err(e) = ctx.leases.reconcile(ctx.store.as_ref()) {
        tracing::warn!(error = %e, "Lease reconciliation failed");
    }

    metrics::set_active_leases(ctx.leases.active_count());
    metrics::set_live_records(ctx.store.len().unwrap_or(0));
}

/// Triggers a flush for every subscription whose push interval elapsed
/// with events queued.
fn run_flush_sweep(ctx: &ServiceContext) {
    let now = Utc::now();
    for id in ctx.subscriptions.due_flushes(now) {
        ctx.subscriptions.trigger_flush(&id);
    }
    metrics::set_subscriptions(ctx.subscriptions.count());
}

/// Memory hygiene pass.
///
/// The allocator returns retained pages on its own; this hook only reports
/// pressure so operators can correlate it with prune and flush activity.
fn run_hygiene(ctx: &ServiceContext) {
    tracing::debug!(
        live_records = ctx.store.len().unwrap_or(0),
        subscriptions = ctx.subscriptions.count(),
        "Memory hygiene pass"
    );
}
