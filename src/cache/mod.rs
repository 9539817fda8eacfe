//! Query cache for backend reads
//!
//! Every backend read is cached under a [`QueryKey`] rendered as
//! `operation:scope[:item]`. Entries go stale after `stale_time` (a stale
//! entry triggers a refetch but is still served if that refetch fails) and
//! are dropped after `idle_timeout` without access.
//!
//! Concurrent reads of the same key collapse into one backend call, and
//! transport failures are retried per [`RetryPolicy`] before they surface.

pub mod keys;
pub mod retry;
pub mod service;
pub mod store;

pub use keys::QueryKey;
pub use retry::RetryPolicy;
pub use service::{spawn_cleanup_task, QueryCache, QueryCacheStats};
pub use store::{CacheStats, Freshness, QueryStore, Served};

use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age after which an entry is refetched on next access
    pub stale_time: Duration,
    /// Entries not accessed for this long are dropped
    pub idle_timeout: Duration,
    /// Maximum number of entries per store
    pub max_entries: usize,
    /// Cleanup interval
    pub cleanup_interval: Duration,
    /// Extra attempts for transient transport failures
    pub transport_retries: u32,
    /// Delay before the first retry, doubled on each further one
    pub retry_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(15 * 60),
            idle_timeout: Duration::from_secs(60 * 60),
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(60),
            transport_retries: 1,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl CacheConfig {
    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stale_secs = std::env::var("CACHE_STALE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.stale_time.as_secs());

        let idle_secs = std::env::var("CACHE_IDLE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.idle_timeout.as_secs());

        let max_entries = std::env::var("CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_entries);

        let transport_retries = std::env::var("TRANSPORT_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.transport_retries);

        Self {
            stale_time: Duration::from_secs(stale_secs),
            idle_timeout: Duration::from_secs(idle_secs),
            max_entries,
            transport_retries,
            ..defaults
        }
    }
}
