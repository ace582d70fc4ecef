//! Property-based tests for the query engine.
//!
//! These tests verify matcher invariants:
//! - An empty query matches every record
//! - `all` is never more permissive than `any` over the same clauses
//! - A clause built from a record's own value always matches that record
//! - Matching is deterministic

use proptest::prelude::*;

use super::{Matcher, Query};
use crate::record::{Record, Value};

// ============================================================================
// Test Strategies - Input Generation
// ============================================================================

/// Strategy for payload keys.
fn payload_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}"
}

/// Strategy for scalar string values.
fn scalar_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._-]{1,20}"
}

/// Strategy for a record value of any representable shape.
fn record_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        scalar_value().prop_map(Value::Str),
        prop::collection::vec(scalar_value(), 1..4).prop_map(Value::List),
        (0u32..100_000).prop_map(|n| Value::Number(f64::from(n))),
        any::<bool>().prop_map(Value::Bool),
    ]
}

/// Strategy for a record with 1..6 payload entries.
fn arb_record() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(payload_key(), record_value(), 1..6)
        .prop_map(|m| m.into_iter().collect())
}

fn matcher_from_pairs(pairs: &[(String, String)], operator: &str) -> Matcher {
    let mut params: Vec<(&str, &str)> = pairs
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    params.push(("record-operator", operator));
    Query::from_params(params).unwrap().matcher()
}

// ============================================================================
// Matcher Invariants
// ============================================================================

proptest! {
    /// Invariant: a query with zero clauses matches every record.
    #[test]
    fn empty_query_matches_all(record in arb_record()) {
        prop_assert!(Matcher::match_all().matches(&record));
    }

    /// Invariant: `all` implies `any` — a record matched under conjunction
    /// is always matched under disjunction of the same clauses.
    #[test]
    fn all_implies_any(record in arb_record(), extra in scalar_value()) {
        let mut pairs: Vec<(String, String)> = record
            .iter()
            .filter_map(|(k, v)| v.first().map(|f| (k.clone(), f)))
            .collect();
        pairs.push(("synthetic-clause".to_string(), extra));

        let all = matcher_from_pairs(&pairs, "all");
        let any = matcher_from_pairs(&pairs, "any");

        if all.matches(&record) {
            prop_assert!(any.matches(&record), "all matched but any did not");
        }
    }

    /// Invariant: a clause taken from the record's own key/value matches it.
    #[test]
    fn self_clause_matches(record in arb_record()) {
        for (key, value) in record.iter() {
            let Some(first) = value.first() else { continue };
            let matcher = matcher_from_pairs(&[(key.clone(), first)], "all");
            prop_assert!(
                matcher.matches(&record),
                "clause from own value failed for key {}",
                key
            );
        }
    }

    /// Invariant: a clause on a key the record lacks never matches under
    /// `all` when it is the only clause.
    #[test]
    fn absent_key_never_matches(record in arb_record(), value in scalar_value()) {
        let matcher = matcher_from_pairs(
            &[("key-that-does-not-exist".to_string(), value)],
            "all",
        );
        prop_assert!(!matcher.matches(&record));
    }

    /// Invariant: evaluation is deterministic.
    #[test]
    fn matching_is_deterministic(record in arb_record(), key in payload_key(), v in scalar_value()) {
        let matcher = matcher_from_pairs(&[(key, v)], "all");
        let first = matcher.matches(&record);
        for _ in 0..3 {
            prop_assert_eq!(matcher.matches(&record), first);
        }
    }
}
