//! Lease manager: admission control and TTL bookkeeping.
//!
//! Every live record is backed by a lease from this manager. Admission is
//! bounded by a configured capacity; a renewal is a `request_lease` on a
//! URI that already holds a lease and replaces it without consuming new
//! capacity. The expires-ordered index answers "what expires next" in
//! O(log n); a background sweep reconciles the index with the store on
//! each maintenance tick.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{Error, Result};
use crate::record::Record;
use crate::store::RecordStore;

#[derive(Default)]
struct Index {
    /// URI → expiry of the active lease.
    leases: HashMap<String, DateTime<Utc>>,
    /// Min-heap over (expiry millis, uri). Entries go stale when a lease is
    /// renewed or released and are discarded lazily.
    by_expiry: BinaryHeap<Reverse<(i64, String)>>,
}

/// Tracks per-record leases under a single exclusive lock.
///
/// Lock hold time is bounded to index mutation; TTL parsing and stamping
/// happen outside it.
pub struct LeaseManager {
    /// Maximum concurrent leases; 0 means unbounded.
    capacity: usize,
    default_ttl: Duration,
    max_ttl: Duration,
    index: Mutex<Index>,
}

impl LeaseManager {
    pub fn new(capacity: usize, default_ttl: Duration, max_ttl: Duration) -> Self {
        Self {
            capacity,
            default_ttl,
            max_ttl,
            index: Mutex::new(Index::default()),
        }
    }

    /// Requests a lease for the record, stamping its TTL and expiry on
    /// success.
    ///
    /// Returns `Ok(false)` without side effect when admission would exceed
    /// capacity. A record whose URI already holds a lease is a renewal: the
    /// existing lease is replaced.
    ///
    /// # Errors
    ///
    /// `BadRequest` if the record carries an unparseable or non-positive
    /// TTL; `Internal` if it has no URI (callers assign identity first).
    pub fn request_lease(&self, record: &mut Record) -> Result<bool> {
        let uri = record
            .uri()
            .ok_or_else(|| Error::Internal("lease requested for record without uri".to_string()))?;

        let mut ttl = record.parse_ttl()?.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() {
            return Err(Error::BadRequest(
                "record-ttl must be a positive duration".to_string(),
            ));
        }
        if ttl > self.max_ttl {
            tracing::debug!(uri = %uri, requested = %ttl, "TTL capped to configured maximum");
            ttl = self.max_ttl;
        }

        let now = Utc::now();
        let expires = now + ttl;

        {
            let mut index = self.index.lock();
            let renewal = index.leases.contains_key(&uri);
            if !renewal && self.capacity > 0 && index.leases.len() >= self.capacity {
                return Ok(false);
            }
            index.leases.insert(uri.clone(), expires);
            index
                .by_expiry
                .push(Reverse((expires.timestamp_millis(), uri)));
        }

        record.set_ttl(ttl);
        record.set_expires(expires);
        Ok(true)
    }

    /// Releases the lease for `uri`. Idempotent.
    pub fn release_lease(&self, uri: &str) {
        self.index.lock().leases.remove(uri);
    }

    /// Number of active leases.
    pub fn active_count(&self) -> usize {
        self.index.lock().leases.len()
    }

    /// The earliest expiry among active leases, discarding stale heap
    /// entries on the way.
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        let mut index = self.index.lock();
        while let Some(Reverse((millis, uri))) = index.by_expiry.peek().cloned() {
            match index.leases.get(&uri) {
                Some(expires) if expires.timestamp_millis() == millis => {
                    return Some(*expires);
                }
                _ => {
                    index.by_expiry.pop();
                }
            }
        }
        None
    }

    /// Rebuilds the lease index from the store's live records.
    ///
    /// Run once per maintenance tick: drops leases whose record is gone and
    /// adopts records this manager has no lease for (e.g. after restart on
    /// a persistent store).
    pub fn reconcile(&self, store: &dyn RecordStore) -> Result<()> {
        let records = store
            .query(&crate::query::Matcher::match_all(), 0, 0)
            .map_err(|e| Error::Internal(format!("lease reconciliation failed: {e}")))?;

        let mut leases = HashMap::with_capacity(records.len());
        let mut by_expiry = BinaryHeap::with_capacity(records.len());
        for record in &records {
            if let (Some(uri), Some(expires)) = (record.uri(), record.expires()) {
                by_expiry.push(Reverse((expires.timestamp_millis(), uri.clone())));
                leases.insert(uri, expires);
            }
        }

        let mut index = self.index.lock();
        let dropped = index.leases.len().saturating_sub(leases.len());
        if dropped > 0 {
            tracing::debug!(dropped, "Reconciled lease index with store");
        }
        index.leases = leases;
        index.by_expiry = by_expiry;
        Ok(())
    }
}
