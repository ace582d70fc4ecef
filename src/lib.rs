// =============================================================================
// Lint Configuration
// =============================================================================

// Safety: no unsafe anywhere in this crate
#![deny(unsafe_code)]
// Correctness: Must handle all fallible operations
#![deny(unused_must_use)]
// Quality: Pedantic but pragmatic
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
// Allowed with documented reasons
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type
#![allow(clippy::module_name_repetitions)] // e.g., config::ServiceConfig is clearer
#![allow(clippy::must_use_candidate)] // Not all returned values need annotation
#![allow(clippy::cast_precision_loss)] // Intentional in metrics gauges
#![allow(clippy::cast_possible_truncation)] // Intentional in duration math
#![allow(clippy::cast_possible_wrap)] // Intentional in duration math

//! slsd - Simple Lookup Service cache daemon.
//!
//! A network-accessible registry where service endpoints publish
//! self-describing records, keep them alive by renewal, and are discovered
//! through structured queries. Subscribers save a query and receive every
//! matching record change in batched pushes.
//!
//! # Architecture
//!
//! - [`record`] - the free-form key/value record model with reserved keys,
//!   TTL and lifecycle state
//! - [`store`] - the record store contract with in-memory and redb-backed
//!   implementations; the archive namespace is a second store instance
//! - [`lease`] - capacity-bounded admission and TTL bookkeeping
//! - [`query`] - the structured matcher with `all`/`any` operators and
//!   skip / max-results paging
//! - [`api`] - registration, edit and query services over an explicit
//!   context object
//! - [`subscribe`] - saved queries, per-subscription queues, and batched
//!   delivery with bounded flush workers
//! - [`maintenance`] - the periodic driver for pruning, time-driven
//!   flushes, and memory hygiene
//! - [`http`] - the axum REST surface

pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod lease;
pub mod logging;
pub mod maintenance;
pub mod metrics;
pub mod query;
pub mod record;
pub mod store;
pub mod subscribe;
