//! Edit service: renew and delete.
//!
//! Both operations fetch the stored record first and authorize against its
//! access token. Renew re-secures the lease with the new (or retained) TTL
//! and bumps the state to `renew`; delete removes the record, tombstones it
//! in the archive, and releases the lease. Either way the resulting state
//! change is fanned out to subscriptions.

use super::ServiceContext;
use crate::error::{Error, Result};
use crate::metrics;
use crate::record::{Record, RecordState};
use crate::store::StoreError;

/// Renews the record under `uri`, extending its expiry.
///
/// `delta` may carry a new TTL (string or single-element list); without
/// one, the stored TTL is retained. An empty delta is a plain heartbeat.
pub fn renew(ctx: &ServiceContext, uri: &str, delta: &Record) -> Result<Record> {
    let stored = ctx
        .store
        .get_by_uri(uri)
        .map_err(Error::from)?
        .ok_or_else(|| Error::NotFound(format!("record {uri}")))?;

    authorize(&stored, delta)?;

    let mut updated = stored;
    if let Some(new_ttl) = delta.parse_ttl()? {
        updated.set_ttl(new_ttl);
    }

    if !ctx.leases.request_lease(&mut updated)? {
        return Err(Error::Forbidden("failed to secure lease".to_string()));
    }
    updated.set_state(RecordState::Renew);

    // A concurrent delete wins the race when it reaches the store first;
    // this renewal then observes the absent row and reports not-found.
    let commit = ctx.commit_lock.lock();
    let renewed = match ctx.store.update(uri, updated) {
        Ok(record) => record,
        Err(StoreError::NotFound(_)) => {
            drop(commit);
            ctx.leases.release_lease(uri);
            return Err(Error::NotFound(format!("record {uri}")));
        }
        Err(e) => return Err(Error::Internal(e.to_string())),
    };
    ctx.subscriptions.fan_out(&renewed);
    drop(commit);

    metrics::record_record_event("renew");
    tracing::info!(uri = %uri, expires = ?renewed.expires(), "Record renewed");
    Ok(renewed)
}

/// Deletes the record under `uri`, tombstoning it in the archive.
pub fn delete(ctx: &ServiceContext, uri: &str, delta: &Record) -> Result<Record> {
    let stored = ctx
        .store
        .get_by_uri(uri)
        .map_err(Error::from)?
        .ok_or_else(|| Error::NotFound(format!("record {uri}")))?;

    authorize(&stored, delta)?;

    let commit = ctx.commit_lock.lock();
    let Some(mut removed) = ctx.store.delete(uri).map_err(Error::from)? else {
        // Lost a race with another delete or the prune sweep.
        return Err(Error::NotFound(format!("record {uri}")));
    };
    removed.set_state(RecordState::Delete);
    ctx.subscriptions.fan_out(&removed);
    drop(commit);

    if let Err(e) = ctx.archive.upsert(removed.clone()) {
        tracing::warn!(uri = %uri, error = %e, "Failed to archive deleted record");
    }
    ctx.leases.release_lease(uri);

    metrics::record_record_event("delete");
    tracing::info!(uri = %uri, "Record deleted");
    Ok(removed)
}

/// Checks the delta's access token against the stored record's.
///
/// A record registered without a token stays openly editable; one with a
/// token requires an exact match on every edit.
fn authorize(stored: &Record, delta: &Record) -> Result<()> {
    let Some(expected) = stored.client_token() else {
        return Ok(());
    };
    match delta.client_token() {
        Some(token) if token == expected => Ok(()),
        _ => Err(Error::Forbidden(
            "client-uuid does not authorize this record".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::register::register;
    use crate::config::ServiceConfig;
    use crate::record::{Value, keys};
    use std::sync::Arc;

    fn proposed(name: &str, token: Option<&str>) -> Record {
        let mut r = Record::new();
        r.set(keys::RECORD_TYPE, Value::List(vec!["service".to_string()]));
        r.set("service-name", Value::List(vec![name.to_string()]));
        r.set(keys::RECORD_TTL, Value::List(vec!["PT1H".to_string()]));
        if let Some(token) = token {
            r.set(keys::CLIENT_UUID, Value::Str(token.to_string()));
        }
        r
    }

    fn registered(ctx: &ServiceContext, name: &str, token: Option<&str>) -> String {
        register(ctx, proposed(name, token)).unwrap().uri().unwrap()
    }

    #[tokio::test]
    async fn test_renew_extends_expiry() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let uri = registered(&ctx, "alpha", None);
        let before = ctx.store.get_by_uri(&uri).unwrap().unwrap();

        let mut delta = Record::new();
        delta.set(keys::RECORD_TTL, Value::List(vec!["PT2H".to_string()]));
        let renewed = renew(&ctx, &uri, &delta).unwrap();

        assert_eq!(renewed.state(), Some(RecordState::Renew));
        assert_eq!(renewed.ttl_raw().as_deref(), Some("PT2H"));
        assert!(renewed.expires().unwrap() > before.expires().unwrap());
    }

    #[tokio::test]
    async fn test_empty_renew_retains_ttl() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let uri = registered(&ctx, "alpha", None);

        let renewed = renew(&ctx, &uri, &Record::new()).unwrap();
        assert_eq!(renewed.ttl_raw().as_deref(), Some("PT1H"));
        assert_eq!(renewed.state(), Some(RecordState::Renew));
    }

    #[tokio::test]
    async fn test_renew_unknown_uri_not_found() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let err = renew(&ctx, "lookup/records/ghost", &Record::new()).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_token_mismatch_is_forbidden() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let uri = registered(&ctx, "alpha", Some("secret"));

        // Missing token.
        let err = renew(&ctx, &uri, &Record::new()).unwrap_err();
        assert_eq!(err.status_code(), 403);

        // Wrong token.
        let mut delta = Record::new();
        delta.set(keys::CLIENT_UUID, Value::Str("guess".to_string()));
        let err = delete(&ctx, &uri, &delta).unwrap_err();
        assert_eq!(err.status_code(), 403);

        // Matching token authorizes.
        let mut delta = Record::new();
        delta.set(keys::CLIENT_UUID, Value::Str("secret".to_string()));
        assert!(renew(&ctx, &uri, &delta).is_ok());
    }

    #[tokio::test]
    async fn test_delete_tombstones_and_releases_lease() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let uri = registered(&ctx, "alpha", None);
        assert_eq!(ctx.leases.active_count(), 1);

        let removed = delete(&ctx, &uri, &Record::new()).unwrap();
        assert_eq!(removed.state(), Some(RecordState::Delete));
        assert!(ctx.store.get_by_uri(&uri).unwrap().is_none());
        assert_eq!(ctx.leases.active_count(), 0);

        let tombstone = ctx.archive.get_by_uri(&uri).unwrap().unwrap();
        assert_eq!(tombstone.state(), Some(RecordState::Delete));
    }

    #[tokio::test]
    async fn test_delete_twice_is_not_found() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let uri = registered(&ctx, "alpha", None);

        delete(&ctx, &uri, &Record::new()).unwrap();
        let err = delete(&ctx, &uri, &Record::new()).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_renew_fans_out_state_change() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let uri = registered(&ctx, "alpha", None);

        let mut query = Record::new();
        query.set(keys::RECORD_TYPE, Value::List(vec!["service".to_string()]));
        let sub = ctx
            .subscriptions
            .subscribe(crate::subscribe::SubscriptionSpec {
                endpoint: "http://127.0.0.1:9/push".to_string(),
                query,
                max_push_events: None,
                push_interval_secs: None,
            })
            .unwrap();

        renew(&ctx, &uri, &Record::new()).unwrap();
        delete(&ctx, &uri, &Record::new()).unwrap();
        assert_eq!(sub.queued_count(), 2);
    }

    #[tokio::test]
    async fn test_interleaving_converges_per_uri() {
        // Register → renew → delete observed in order by a reader.
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let ctx = Arc::clone(&ctx);
        let uri = registered(&ctx, "alpha", None);

        renew(&ctx, &uri, &Record::new()).unwrap();
        delete(&ctx, &uri, &Record::new()).unwrap();

        assert!(ctx.store.get_by_uri(&uri).unwrap().is_none());
        assert_eq!(
            ctx.archive
                .get_by_uri(&uri)
                .unwrap()
                .unwrap()
                .state(),
            Some(RecordState::Delete)
        );
    }
}
