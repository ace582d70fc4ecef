//! Service configuration.
//!
//! Loads settings from an `slsd.toml` file; every section and field has a
//! default so a missing or partial file still yields a runnable service.
//!
//! # Example Configuration
//!
//! ```toml
//! [service]
//! host = "0.0.0.0"
//! port = 8090
//!
//! [lease]
//! capacity = 50000
//! default_ttl = "PT1H"
//!
//! [storage]
//! backend = "persistent"
//!
//! [publish]
//! max_push_events = 10
//! push_interval_secs = 60
//! ```

use anyhow::{Context, Result, bail};
use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::record::ttl;

/// Service configuration loaded from `slsd.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    pub service: ServiceSettings,
    /// Lease admission settings.
    pub lease: LeaseSettings,
    /// Record store settings.
    pub storage: StorageSettings,
    /// Maintenance cadence settings.
    pub maintenance: MaintenanceSettings,
    /// Subscription publish settings.
    pub publish: PublishSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Bind address.
    pub host: String,
    /// Listener port.
    pub port: u16,
    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            request_timeout_secs: 30,
        }
    }
}

/// Lease admission settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaseSettings {
    /// Total lease capacity; 0 means unbounded.
    pub capacity: usize,
    /// TTL applied when a record carries none (ISO-8601 duration).
    pub default_ttl: String,
    /// Upper bound on any requested TTL (ISO-8601 duration).
    pub max_ttl: String,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            capacity: 0,
            default_ttl: "PT1H".to_string(),
            max_ttl: "P7D".to_string(),
        }
    }
}

impl LeaseSettings {
    pub fn default_ttl(&self) -> Result<Duration> {
        ttl::parse_duration(&self.default_ttl)
            .with_context(|| format!("invalid lease.default_ttl '{}'", self.default_ttl))
    }

    pub fn max_ttl(&self) -> Result<Duration> {
        ttl::parse_duration(&self.max_ttl)
            .with_context(|| format!("invalid lease.max_ttl '{}'", self.max_ttl))
    }
}

/// Which record store implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory only; records do not survive restart.
    Memory,
    /// redb-backed; records and subscriptions survive restart.
    #[default]
    Persistent,
}

/// Record store settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Store implementation.
    pub backend: StorageBackend,
    /// Data directory; defaults to `~/.slsd`.
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolves the data directory, creating it if needed.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .context("Failed to get home directory")?
                .join(".slsd"),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        Ok(dir)
    }
}

/// Maintenance cadence settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    /// Seconds between prune sweeps.
    pub prune_interval_secs: u64,
    /// Grace window after expiry before a record is removed, in seconds.
    pub prune_threshold_secs: u64,
    /// Seconds between checks for time-driven subscription flushes.
    pub flush_check_secs: u64,
    /// Seconds between memory hygiene passes.
    pub hygiene_interval_secs: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            prune_interval_secs: 30,
            prune_threshold_secs: 300,
            flush_check_secs: 1,
            hygiene_interval_secs: 60,
        }
    }
}

/// Subscription publish settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Queue size that triggers an immediate flush.
    pub max_push_events: usize,
    /// Default seconds between time-driven flushes per subscription.
    pub push_interval_secs: u64,
    /// Per-attempt timeout for a push to the subscriber endpoint.
    pub push_timeout_secs: u64,
    /// Consecutive delivery failures before a subscription is retired.
    pub failure_threshold: u32,
    /// Concurrent flush workers.
    pub flush_workers: usize,
    /// Pending flush-trigger queue depth.
    pub flush_queue_depth: usize,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_push_events: 10,
            push_interval_secs: 60,
            push_timeout_secs: 8,
            failure_threshold: 3,
            flush_workers: 4,
            flush_queue_depth: 256,
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from the given path, or from `slsd.toml` in the
    /// current directory when no path is given.
    ///
    /// A missing file yields the defaults; an unreadable or invalid file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(|| PathBuf::from("slsd.toml"), Path::to_path_buf);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate()?;

        tracing::info!(
            path = %path.display(),
            port = config.service.port,
            backend = ?config.storage.backend,
            lease_capacity = config.lease.capacity,
            "Loaded service configuration"
        );

        Ok(config)
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let default_ttl = self.lease.default_ttl()?;
        let max_ttl = self.lease.max_ttl()?;
        if default_ttl <= Duration::zero() {
            bail!("lease.default_ttl must be positive");
        }
        if max_ttl < default_ttl {
            bail!("lease.max_ttl must be at least lease.default_ttl");
        }
        if self.publish.max_push_events == 0 {
            bail!("publish.max_push_events must be at least 1");
        }
        if self.publish.flush_workers == 0 {
            bail!("publish.flush_workers must be at least 1");
        }
        if self.maintenance.prune_interval_secs == 0 {
            bail!("maintenance.prune_interval_secs must be at least 1");
        }
        Ok(())
    }
}
