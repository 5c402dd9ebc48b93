//! Content store configuration DTOs.
//!
//! Numeric and duration inputs only. Every section has defaults so a
//! partial TOML file is accepted; the digest algorithm name is the only
//! value checked, and that happens at startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub store: StoreSection,
    pub cache: CacheConfig,
    pub incoming: IncomingConfig,
    pub delete: DeleteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Name of the digest algorithm; only SHA-256 is available.
    pub digest_algorithm: String,
    /// Gzip blobs materialized in the incoming area.
    pub compress_blobs: bool,
    /// Populate the local cache from a blob right after staging it.
    pub cache_write_through: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            digest_algorithm: "SHA-256".to_string(),
            compress_blobs: false,
            cache_write_through: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_files: usize,
    pub max_bytes: u64,
    /// Entries accessed more recently than this are never evicted.
    pub min_lifetime_ms: u64,
}

impl CacheConfig {
    pub fn min_lifetime(&self) -> Duration {
        Duration::from_millis(self.min_lifetime_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("store/cache"),
            max_files: 10_000,
            max_bytes: 1024 * 1024 * 1024, // 1 GB
            min_lifetime_ms: 60 * 1000,    // 1 minute
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncomingConfig {
    pub dir: PathBuf,
    /// Files older than this are reclaimed by the sweeper.
    pub max_age_mins: u64,
    pub sweep_interval_secs: u64,
}

impl IncomingConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_mins * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for IncomingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("store/incoming"),
            max_age_mins: 480, // 8 hours
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteConfig {
    /// Bulk delete aborts once more than this many deletes fail in a row.
    pub max_consecutive_failures: u32,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 25,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// When set, logs are also written to daily-rolling files here.
    pub dir: Option<PathBuf>,
}
