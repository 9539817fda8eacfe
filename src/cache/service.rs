//! Cached, retried access to a reservation backend

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::keys::QueryKey;
use super::retry::RetryPolicy;
use super::store::{CacheStats, QueryStore, Served};
use super::CacheConfig;
use crate::backend::ReservationBackend;
use crate::types::{
    BackendResult, Lab, LabId, LabMetadata, LabOwner, RecordLookup, ReservationKey, Subject,
};

/// Per-store statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct QueryCacheStats {
    pub counts: CacheStats,
    pub keys: CacheStats,
    pub reservations: CacheStats,
    pub labs: CacheStats,
    pub metadata: CacheStats,
    pub owners: CacheStats,
}

impl QueryCacheStats {
    pub fn total(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for stats in [
            &self.counts,
            &self.keys,
            &self.reservations,
            &self.labs,
            &self.metadata,
            &self.owners,
        ] {
            total.add(stats);
        }
        total
    }
}

/// One store per read operation. Shared between composers through `Arc`.
pub struct QueryCache {
    config: CacheConfig,
    retry: RetryPolicy,
    counts: QueryStore<u64>,
    keys: QueryStore<Option<ReservationKey>>,
    reservations: QueryStore<RecordLookup>,
    labs: QueryStore<Option<Lab>>,
    metadata: QueryStore<Option<LabMetadata>>,
    owners: QueryStore<Option<LabOwner>>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config),
            counts: QueryStore::new("counts", config.clone()),
            keys: QueryStore::new("keys", config.clone()),
            reservations: QueryStore::new("reservations", config.clone()),
            labs: QueryStore::new("labs", config.clone()),
            metadata: QueryStore::new("metadata", config.clone()),
            owners: QueryStore::new("owners", config.clone()),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn count(
        &self,
        backend: &dyn ReservationBackend,
        subject: &Subject,
    ) -> BackendResult<Served<u64>> {
        let key = QueryKey::count(subject);
        let label = key.to_string();
        self.counts
            .get_or_fetch(&key, || {
                self.retry
                    .run(&label, || backend.reservation_count(subject))
            })
            .await
    }

    pub async fn key_at(
        &self,
        backend: &dyn ReservationBackend,
        subject: &Subject,
        index: u64,
    ) -> BackendResult<Served<Option<ReservationKey>>> {
        let key = QueryKey::key_at(subject, index);
        let label = key.to_string();
        self.keys
            .get_or_fetch(&key, || {
                self.retry
                    .run(&label, || backend.reservation_key_at(subject, index))
            })
            .await
    }

    pub async fn reservation(
        &self,
        backend: &dyn ReservationBackend,
        reservation_key: &ReservationKey,
    ) -> BackendResult<Served<RecordLookup>> {
        let key = QueryKey::reservation(reservation_key);
        let label = key.to_string();
        self.reservations
            .get_or_fetch(&key, || {
                self.retry
                    .run(&label, || backend.reservation(reservation_key))
            })
            .await
    }

    /// Base lab; `None` when the backend says it does not exist
    pub async fn lab(
        &self,
        backend: &dyn ReservationBackend,
        lab_id: LabId,
    ) -> BackendResult<Served<Option<Lab>>> {
        let key = QueryKey::lab(lab_id);
        let label = key.to_string();
        self.labs
            .get_or_fetch(&key, || {
                self.retry.run_optional(&label, || backend.lab(lab_id))
            })
            .await
    }

    pub async fn lab_metadata(
        &self,
        backend: &dyn ReservationBackend,
        uri: &str,
    ) -> BackendResult<Served<Option<LabMetadata>>> {
        let key = QueryKey::lab_metadata(uri);
        let label = key.to_string();
        self.metadata
            .get_or_fetch(&key, || {
                self.retry.run_optional(&label, || backend.lab_metadata(uri))
            })
            .await
    }

    pub async fn lab_owner(
        &self,
        backend: &dyn ReservationBackend,
        lab_id: LabId,
    ) -> BackendResult<Served<Option<LabOwner>>> {
        let key = QueryKey::lab_owner(lab_id);
        let label = key.to_string();
        self.owners
            .get_or_fetch(&key, || {
                self.retry.run_optional(&label, || backend.lab_owner(lab_id))
            })
            .await
    }

    pub fn peek_count(&self, subject: &Subject) -> Option<Served<u64>> {
        self.counts.peek(&QueryKey::count(subject))
    }

    pub fn peek_key_at(&self, subject: &Subject, index: u64) -> Option<Served<Option<ReservationKey>>> {
        self.keys.peek(&QueryKey::key_at(subject, index))
    }

    pub fn peek_reservation(&self, key: &ReservationKey) -> Option<Served<RecordLookup>> {
        self.reservations.peek(&QueryKey::reservation(key))
    }

    pub fn peek_lab(&self, lab_id: LabId) -> Option<Served<Option<Lab>>> {
        self.labs.peek(&QueryKey::lab(lab_id))
    }

    pub fn peek_lab_metadata(&self, uri: &str) -> Option<Served<Option<LabMetadata>>> {
        self.metadata.peek(&QueryKey::lab_metadata(uri))
    }

    pub fn peek_lab_owner(&self, lab_id: LabId) -> Option<Served<Option<LabOwner>>> {
        self.owners.peek(&QueryKey::lab_owner(lab_id))
    }

    /// Force the next read of a reservation to hit the backend
    pub fn invalidate_reservation(&self, key: &ReservationKey) {
        self.reservations.remove(&QueryKey::reservation(key));
        debug!(reservation = %key.short(), "Invalidated reservation");
    }

    /// Force the next read of a subject's count and key list to hit the backend
    pub fn invalidate_subject(&self, subject: &Subject) -> usize {
        let count = self.counts.remove(&QueryKey::count(subject)).is_some() as usize;
        let keys = self
            .keys
            .invalidate_prefix(&QueryKey::key_list_pattern(subject));
        debug!(subject = %subject, removed = count + keys, "Invalidated subject");
        count + keys
    }

    /// Invalidation after a confirmed create, cancel or status change
    pub fn invalidate_after_mutation(&self, subject: &Subject, key: Option<&ReservationKey>) {
        if let Some(key) = key {
            self.invalidate_reservation(key);
        }
        self.invalidate_subject(subject);
    }

    /// Clear all stores
    pub fn clear(&self) {
        self.counts.clear();
        self.keys.clear();
        self.reservations.clear();
        self.labs.clear();
        self.metadata.clear();
        self.owners.clear();
        info!("Query cache cleared");
    }

    /// Remove idle entries from every store
    pub fn cleanup(&self) -> usize {
        self.counts.cleanup()
            + self.keys.cleanup()
            + self.reservations.cleanup()
            + self.labs.cleanup()
            + self.metadata.cleanup()
            + self.owners.cleanup()
    }

    pub fn stats(&self) -> QueryCacheStats {
        QueryCacheStats {
            counts: self.counts.stats(),
            keys: self.keys.stats(),
            reservations: self.reservations.stats(),
            labs: self.labs.stats(),
            metadata: self.metadata.stats(),
            owners: self.owners.stats(),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Spawn a background task to periodically drop idle entries
pub fn spawn_cleanup_task(cache: Arc<QueryCache>) -> JoinHandle<()> {
    let interval = cache.config.cleanup_interval;

    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup();
            let stats = cache.stats().total();
            debug!(
                removed = removed,
                entries = stats.entries,
                hit_rate = format!("{:.1}%", stats.hit_rate()),
                "Cache cleanup completed"
            );
        }
    });

    info!("Cache cleanup task started");
    handle
}
