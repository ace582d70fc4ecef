//! Query service.
//!
//! Thin orchestrator over the query engine: routes the live and archive
//! namespaces to their stores and applies skip / max-results exactly as
//! the engine specifies.

use super::ServiceContext;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::record::Record;

/// Queries the live store.
pub fn query_live(ctx: &ServiceContext, query: &Query) -> Result<Vec<Record>> {
    ctx.store
        .query(&query.matcher(), query.skip(), query.max_results())
        .map_err(Error::from)
}

/// Queries the archive of historical and tombstoned records.
pub fn query_archive(ctx: &ServiceContext, query: &Query) -> Result<Vec<Record>> {
    ctx.archive
        .query(&query.matcher(), query.skip(), query.max_results())
        .map_err(Error::from)
}

/// Fetches a single live record by URI.
pub fn get_record(ctx: &ServiceContext, uri: &str) -> Result<Record> {
    ctx.store
        .get_by_uri(uri)
        .map_err(Error::from)?
        .ok_or_else(|| Error::NotFound(format!("record {uri}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{edit, register::register};
    use crate::config::ServiceConfig;
    use crate::record::{RecordState, Value, keys};

    fn proposed(loc: &str) -> Record {
        let mut r = Record::new();
        r.set(keys::RECORD_TYPE, Value::List(vec!["service".to_string()]));
        r.set("loc", Value::List(vec![loc.to_string()]));
        r
    }

    #[tokio::test]
    async fn test_all_vs_any_over_live_store() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        register(&ctx, proposed("east")).unwrap();
        register(&ctx, proposed("west")).unwrap();

        let all = Query::from_params([("type", "service"), ("loc", "east")]).unwrap();
        let results = query_live(&ctx, &all).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].get("loc"),
            Some(&Value::List(vec!["east".to_string()]))
        );

        let any = Query::from_params([
            ("type", "service"),
            ("loc", "east,west"),
            ("record-operator", "any"),
        ])
        .unwrap();
        assert_eq!(query_live(&ctx, &any).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_paging_bounds() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        for loc in ["a", "b", "c"] {
            register(&ctx, proposed(loc)).unwrap();
        }

        let q = Query::from_params([("record-skip", "1"), ("record-max-results", "1")]).unwrap();
        assert_eq!(query_live(&ctx, &q).unwrap().len(), 1);

        let past_end = Query::from_params([("record-skip", "9")]).unwrap();
        assert!(query_live(&ctx, &past_end).unwrap().is_empty());

        let unlimited = Query::from_params([("record-max-results", "0")]).unwrap();
        assert_eq!(query_live(&ctx, &unlimited).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_archive_serves_tombstones() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let uri = register(&ctx, proposed("east")).unwrap().uri().unwrap();
        edit::delete(&ctx, &uri, &Record::new()).unwrap();

        // Gone from live, visible in the archive with state delete.
        let live = Query::from_params([("type", "service")]).unwrap();
        assert!(query_live(&ctx, &live).unwrap().is_empty());

        let by_uri = Query::from_params([("record-uri", uri.as_str())]).unwrap();
        let archived = query_archive(&ctx, &by_uri).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].state(), Some(RecordState::Delete));
    }

    #[tokio::test]
    async fn test_get_record_not_found() {
        let (ctx, _rx) = ServiceContext::for_tests(ServiceConfig::default());
        let err = get_record(&ctx, "lookup/records/ghost").unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
