//! Record model for the lookup service.
//!
//! A record is a free-form mapping from string keys to values, where a value
//! is a string, number, boolean, or list of strings. Keys in the reserved
//! namespace (`record-*`, `client-uuid`, `type`) carry service semantics;
//! everything else is opaque payload published by the client.

pub mod ttl;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Reserved wire keys with service semantics.
pub mod keys {
    /// Record identity, assigned on registration.
    pub const RECORD_URI: &str = "record-uri";
    /// Time-to-live as an ISO-8601 duration.
    pub const RECORD_TTL: &str = "record-ttl";
    /// Absolute expiry timestamp (RFC3339).
    pub const RECORD_EXPIRES: &str = "record-expires";
    /// Lifecycle state.
    pub const RECORD_STATE: &str = "record-state";
    /// Query control: clause combination operator.
    pub const RECORD_OPERATOR: &str = "record-operator";
    /// Query control: number of leading matches to drop.
    pub const RECORD_SKIP: &str = "record-skip";
    /// Query control: result cap (0 = unlimited).
    pub const RECORD_MAX_RESULTS: &str = "record-max-results";
    /// Optional access token authorizing renew/delete.
    pub const CLIENT_UUID: &str = "client-uuid";
    /// Required record classification (host, interface, service, ...).
    pub const RECORD_TYPE: &str = "type";
}

/// A record value: string, number, boolean, or list of strings.
///
/// Variant order matters for untagged deserialization: bools and numbers
/// must be tried before strings. Nested objects and mixed arrays are
/// rejected at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<String>),
}

impl Value {
    /// Renders this value as the set of strings the query engine matches on.
    ///
    /// Strings and list items render as themselves; numbers and booleans
    /// render in their canonical JSON form.
    pub fn render(&self) -> Vec<String> {
        match self {
            Self::Str(s) => vec![s.clone()],
            Self::List(items) => items.clone(),
            Self::Number(n) => vec![render_number(*n)],
            Self::Bool(b) => vec![b.to_string()],
        }
    }

    /// Returns the first string form of this value.
    pub fn first(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::List(items) => items.first().cloned(),
            Self::Number(n) => Some(render_number(*n)),
            Self::Bool(b) => Some(b.to_string()),
        }
    }
}

/// Canonical string form of a numeric value (integers without a trailing `.0`).
fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Freshly admitted.
    Register,
    /// Lease renewed at least once since registration.
    Renew,
    /// Explicitly removed; tombstoned in the archive.
    Delete,
    /// Lease ran out without renewal.
    Expired,
}

impl RecordState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Renew => "renew",
            Self::Delete => "delete",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "register" => Some(Self::Register),
            "renew" => Some(Self::Renew),
            "delete" => Some(Self::Delete),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered document, identified by URI once admitted.
///
/// The map is ordered so that serialized output and query results are
/// deterministic for identical inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    map: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a record from a JSON document.
    ///
    /// Rejects values the model cannot represent (nested objects, mixed or
    /// nested arrays) with `BadRequest`.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::BadRequest(format!("malformed record document: {e}")))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    // -------------------------------------------------------------------------
    // Reserved-key accessors
    // -------------------------------------------------------------------------

    /// The record's URI, if assigned.
    pub fn uri(&self) -> Option<String> {
        self.get(keys::RECORD_URI).and_then(Value::first)
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.set(keys::RECORD_URI, Value::Str(uri.into()));
    }

    /// The record's classification (first value of `type`).
    pub fn record_type(&self) -> Option<String> {
        self.get(keys::RECORD_TYPE).and_then(Value::first)
    }

    pub fn state(&self) -> Option<RecordState> {
        self.get(keys::RECORD_STATE)
            .and_then(Value::first)
            .and_then(|s| RecordState::parse(&s))
    }

    pub fn set_state(&mut self, state: RecordState) {
        self.set(keys::RECORD_STATE, Value::Str(state.as_str().to_string()));
    }

    /// The raw TTL string, if present.
    ///
    /// The wire shape is sometimes a string and sometimes a single-element
    /// list; both are accepted here.
    pub fn ttl_raw(&self) -> Option<String> {
        self.get(keys::RECORD_TTL).and_then(Value::first)
    }

    /// Parses the record's TTL into a duration.
    ///
    /// Returns `Ok(None)` when no TTL is present and `BadRequest` when one
    /// is present but not a valid ISO-8601 duration.
    pub fn parse_ttl(&self) -> Result<Option<chrono::Duration>> {
        match self.ttl_raw() {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => ttl::parse_duration(&raw)
                .map(Some)
                .map_err(|e| Error::BadRequest(format!("invalid record-ttl: {e}"))),
        }
    }

    /// Stores a TTL in its normalized string form.
    pub fn set_ttl(&mut self, ttl: chrono::Duration) {
        self.set(keys::RECORD_TTL, Value::Str(ttl::format_duration(ttl)));
    }

    /// The absolute expiry timestamp, if stamped.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.get(keys::RECORD_EXPIRES)
            .and_then(Value::first)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn set_expires(&mut self, expires: DateTime<Utc>) {
        self.set(
            keys::RECORD_EXPIRES,
            Value::Str(expires.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );
    }

    /// The access token authorizing edits, if the publisher set one.
    pub fn client_token(&self) -> Option<String> {
        self.get(keys::CLIENT_UUID).and_then(Value::first)
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Validates a proposed record for registration.
    ///
    /// Requires a non-empty `type` and at least one identifying payload key
    /// beyond the reserved namespace.
    pub fn validate_for_register(&self) -> Result<()> {
        match self.record_type() {
            Some(t) if !t.is_empty() => {}
            _ => {
                return Err(Error::BadRequest(
                    "record must carry a non-empty type".to_string(),
                ));
            }
        }

        let has_payload = self.map.keys().any(|k| !is_reserved(k));
        if !has_payload {
            return Err(Error::BadRequest(
                "record must carry at least one payload attribute".to_string(),
            ));
        }

        Ok(())
    }

    /// Strips service-assigned keys from a client-submitted document.
    ///
    /// Registration assigns identity, expiry and state itself; anything the
    /// client sent under those keys is discarded.
    pub fn strip_assigned(&mut self) {
        self.map.remove(keys::RECORD_URI);
        self.map.remove(keys::RECORD_EXPIRES);
        self.map.remove(keys::RECORD_STATE);
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

/// Whether a key belongs to the reserved namespace.
pub fn is_reserved(key: &str) -> bool {
    key.starts_with("record-") || key == keys::CLIENT_UUID || key == keys::RECORD_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_record() -> Record {
        let mut r = Record::new();
        r.set(keys::RECORD_TYPE, Value::List(vec!["service".to_string()]));
        r.set(
            "service-name",
            Value::List(vec!["alpha".to_string()]),
        );
        r.set(keys::RECORD_TTL, Value::List(vec!["PT1H".to_string()]));
        r
    }

    #[test]
    fn test_parse_wire_document() {
        let body = br#"{"type":["service"],"service-name":["alpha"],"record-ttl":["PT1H"]}"#;
        let record = Record::from_json(body).unwrap();
        assert_eq!(record.record_type().as_deref(), Some("service"));
        assert_eq!(record.ttl_raw().as_deref(), Some("PT1H"));
    }

    #[test]
    fn test_reject_nested_object() {
        let body = br#"{"type":["service"],"meta":{"nested":"object"}}"#;
        let err = Record::from_json(body).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_ttl_accepts_string_or_list() {
        let mut r = Record::new();
        r.set(keys::RECORD_TTL, Value::Str("PT2H".to_string()));
        assert_eq!(r.parse_ttl().unwrap(), Some(chrono::Duration::hours(2)));

        r.set(keys::RECORD_TTL, Value::List(vec!["PT30M".to_string()]));
        assert_eq!(r.parse_ttl().unwrap(), Some(chrono::Duration::minutes(30)));
    }

    #[test]
    fn test_empty_ttl_means_absent() {
        let mut r = Record::new();
        r.set(keys::RECORD_TTL, Value::List(vec![]));
        assert_eq!(r.parse_ttl().unwrap(), None);
    }

    #[test]
    fn test_invalid_ttl_is_bad_request() {
        let mut r = Record::new();
        r.set(keys::RECORD_TTL, Value::Str("1 hour".to_string()));
        assert_eq!(r.parse_ttl().unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_expires_roundtrip() {
        let mut r = Record::new();
        let now = Utc::now();
        r.set_expires(now);
        let back = r.expires().unwrap();
        assert!((back - now).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_state_roundtrip() {
        let mut r = Record::new();
        r.set_state(RecordState::Renew);
        assert_eq!(r.state(), Some(RecordState::Renew));
        assert_eq!(
            r.get(keys::RECORD_STATE).and_then(Value::first).as_deref(),
            Some("renew")
        );
    }

    #[test]
    fn test_validate_requires_type() {
        let mut r = Record::new();
        r.set("service-name", Value::Str("alpha".to_string()));
        assert_eq!(r.validate_for_register().unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_validate_requires_payload() {
        let mut r = Record::new();
        r.set(keys::RECORD_TYPE, Value::List(vec!["service".to_string()]));
        assert_eq!(r.validate_for_register().unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_validate_accepts_complete_record() {
        assert!(service_record().validate_for_register().is_ok());
    }

    #[test]
    fn test_strip_assigned_removes_identity() {
        let mut r = service_record();
        r.set_uri("lookup/records/fake");
        r.set_state(RecordState::Delete);
        r.set_expires(Utc::now());
        r.strip_assigned();
        assert!(r.uri().is_none());
        assert!(r.state().is_none());
        assert!(r.expires().is_none());
        assert!(r.contains_key(keys::RECORD_TTL));
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(Value::Number(8080.0).render(), vec!["8080".to_string()]);
        assert_eq!(Value::Number(1.5).render(), vec!["1.5".to_string()]);
        assert_eq!(Value::Bool(true).render(), vec!["true".to_string()]);
    }
}
