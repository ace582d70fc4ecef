//! Registration service.
//!
//! Validates a proposed record, assigns its URI, secures a lease, writes
//! it to the store, and hands it to the subscription manager for fan-out.

use uuid::Uuid;

use super::{LOOKUP_PREFIX, ServiceContext};
use crate::error::{Error, Result};
use crate::metrics;
use crate::record::{Record, RecordState};
use crate::store::StoreError;

/// Registers a proposed record and returns the stored form, including the
/// assigned URI and computed expiry.
pub fn register(ctx: &ServiceContext, mut record: Record) -> Result<Record> {
    record.validate_for_register()?;
    record.strip_assigned();

    // A v4 collision is vanishingly rare but the store surfaces it as
    // DUPLICATE; one retry with a fresh URI before giving up.
    for attempt in 0..2 {
        let uri = new_uri();
        let mut candidate = record.clone();
        candidate.set_uri(&uri);

        if !ctx.leases.request_lease(&mut candidate)? {
            metrics::record_lease_denial();
            tracing::warn!(
                active = ctx.leases.active_count(),
                "Registration refused at lease capacity"
            );
            return Err(Error::ServiceUnavailable(
                "record registry is at lease capacity".to_string(),
            ));
        }

        candidate.set_state(RecordState::Register);
        let commit = ctx.commit_lock.lock();
        match ctx.store.insert(candidate.clone()) {
            Ok(_) => {
                metrics::record_record_event("register");
                tracing::info!(
                    uri = %uri,
                    record_type = candidate.record_type().as_deref().unwrap_or("?"),
                    expires = ?candidate.expires(),
                    "Record registered"
                );
                ctx.subscriptions.fan_out(&candidate);
                return Ok(candidate);
            }
            Err(StoreError::Duplicate(_)) => {
                drop(commit);
                ctx.leases.release_lease(&uri);
                tracing::warn!(uri = %uri, attempt, "URI collision on insert, retrying");
            }
            Err(e) => {
                drop(commit);
                ctx.leases.release_lease(&uri);
                return Err(Error::Internal(e.to_string()));
            }
        }
    }

    Err(Error::Internal(
        "failed to assign a unique record uri".to_string(),
    ))
}

fn new_uri() -> String {
    format!("{LOOKUP_PREFIX}/records/{}", Uuid::new_v4())
}
