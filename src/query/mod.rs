//! Query engine: structured matching over records.
//!
//! A query is a record-shaped document augmented with three reserved
//! controls (`record-operator`, `record-skip`, `record-max-results`).
//! Every other key/value pair is a match clause. Reserved-prefixed keys
//! that are not one of the controls stay match clauses, so newer peers
//! can query on reserved attributes this cache does not know about.

#[cfg(test)]
mod property_tests;

use std::fmt;

use crate::error::{Error, Result};
use crate::record::{Record, Value, keys};

/// How clauses combine: `all` (conjunction, the default) or `any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    #[default]
    All,
    Any,
}

impl Operator {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            other => Err(Error::BadRequest(format!(
                "unknown operator '{other}' (expected 'all' or 'any')"
            ))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value side of a match clause.
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseValue {
    /// Matches when the record value equals it or, for list-valued record
    /// keys, contains it.
    One(String),
    /// Matches when the record value set intersects it non-emptily.
    Many(Vec<String>),
}

impl ClauseValue {
    fn values(&self) -> &[String] {
        match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(vs) => vs,
        }
    }
}

/// A parsed query: match clauses plus paging controls.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    clauses: Vec<(String, ClauseValue)>,
    operator: Operator,
    skip: usize,
    max_results: usize,
}

impl Query {
    /// A query with no clauses; matches every record.
    pub fn match_all() -> Self {
        Self {
            clauses: Vec::new(),
            operator: Operator::All,
            skip: 0,
            max_results: 0,
        }
    }

    /// Parses a query from a record-shaped document (the saved-query form
    /// used by subscriptions and POSTed query bodies).
    pub fn from_record(doc: &Record) -> Result<Self> {
        let mut query = Self::match_all();

        for (key, value) in doc.iter() {
            match key.as_str() {
                keys::RECORD_OPERATOR => {
                    let raw = value
                        .first()
                        .ok_or_else(|| Error::BadRequest("empty operator".to_string()))?;
                    query.operator = Operator::parse(&raw)?;
                }
                keys::RECORD_SKIP => query.skip = parse_control(keys::RECORD_SKIP, value)?,
                keys::RECORD_MAX_RESULTS => {
                    query.max_results = parse_control(keys::RECORD_MAX_RESULTS, value)?;
                }
                _ => query.clauses.push((key.clone(), clause_value(value))),
            }
        }

        Ok(query)
    }

    /// Parses a query from decoded query-string pairs.
    ///
    /// A value containing commas becomes a list clause; `record-operator`,
    /// `record-skip` and `record-max-results` are extracted as controls.
    pub fn from_params<'a, I>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = Self::match_all();

        for (key, value) in params {
            match key {
                keys::RECORD_OPERATOR => query.operator = Operator::parse(value)?,
                keys::RECORD_SKIP => query.skip = parse_param(keys::RECORD_SKIP, value)?,
                keys::RECORD_MAX_RESULTS => {
                    query.max_results = parse_param(keys::RECORD_MAX_RESULTS, value)?;
                }
                _ => {
                    let clause = if value.contains(',') {
                        ClauseValue::Many(value.split(',').map(str::to_string).collect())
                    } else {
                        ClauseValue::One(value.to_string())
                    };
                    query.clauses.push((key.to_string(), clause));
                }
            }
        }

        Ok(query)
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    /// Result cap; 0 means unlimited.
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    /// The matcher-only view of this query (no skip/limit), as used for
    /// subscription fan-out.
    pub fn matcher(&self) -> Matcher {
        Matcher {
            clauses: self.clauses.clone(),
            operator: self.operator,
        }
    }
}

/// Predicate over records built from a query's clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    clauses: Vec<(String, ClauseValue)>,
    operator: Operator,
}

impl Matcher {
    /// A matcher with no clauses; matches every record.
    pub fn match_all() -> Self {
        Query::match_all().matcher()
    }

    /// Evaluates this matcher against a record.
    ///
    /// A query with zero clauses matches every record.
    pub fn matches(&self, record: &Record) -> bool {
        if self.clauses.is_empty() {
            return true;
        }

        match self.operator {
            Operator::All => self.clauses.iter().all(|(k, v)| clause_matches(record, k, v)),
            Operator::Any => self.clauses.iter().any(|(k, v)| clause_matches(record, k, v)),
        }
    }
}

/// One clause matches when the record key exists and the value sets
/// intersect, broadening singletons to sets as needed.
fn clause_matches(record: &Record, key: &str, clause: &ClauseValue) -> bool {
    let Some(value) = record.get(key) else {
        return false;
    };
    let rendered = value.render();
    clause.values().iter().any(|v| rendered.contains(v))
}

fn clause_value(value: &Value) -> ClauseValue {
    match value {
        Value::List(items) => ClauseValue::Many(items.clone()),
        other => ClauseValue::One(
            other
                .first()
                .unwrap_or_default(),
        ),
    }
}

/// Parses a skip / max-results control from a document value.
///
/// Numbers must be non-negative integers; strings (and single-element
/// lists) must parse as one.
fn parse_control(name: &str, value: &Value) -> Result<usize> {
    let invalid = || Error::BadRequest(format!("{name} must be a non-negative integer"));

    match value {
        Value::Number(n) => {
            if n.fract() != 0.0 || *n < 0.0 {
                return Err(invalid());
            }
            Ok(*n as usize)
        }
        Value::Str(s) => s.parse().map_err(|_| invalid()),
        Value::List(items) => match items.as_slice() {
            [single] => single.parse().map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        Value::Bool(_) => Err(invalid()),
    }
}

fn parse_param(name: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| Error::BadRequest(format!("{name} must be a non-negative integer")))
}
