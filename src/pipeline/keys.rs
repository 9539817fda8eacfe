//! Index → key fan-out

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::failures::{FailureStage, PartialFailure};
use super::PipelineConfig;
use crate::backend::ReservationBackend;
use crate::cache::QueryCache;
use crate::types::{ReservationKey, Subject};

/// Number of indices to look up for a count
pub fn fanout_bound(count: u64, limit: Option<u64>, ceiling: u64) -> u64 {
    count.min(limit.unwrap_or(u64::MAX)).min(ceiling)
}

/// Keys resolved for a subject, in index order
#[derive(Debug, Clone, Default)]
pub struct KeyResolution {
    pub keys: Vec<ReservationKey>,
    pub failures: Vec<PartialFailure>,
    /// Legs that issued a lookup
    pub attempted: usize,
    /// Indices dropped at dispatch because the bound shrank
    pub skipped: usize,
    pub is_stale: bool,
}

enum Leg {
    Resolved(Option<ReservationKey>, bool),
    Skipped,
    Failed(PartialFailure),
}

/// Issues one key lookup per index below the fan-out bound
pub struct IndexKeyResolver<'a> {
    cache: &'a QueryCache,
    backend: &'a dyn ReservationBackend,
    ceiling: u64,
    limit: Option<u64>,
    concurrency: usize,
}

impl<'a> IndexKeyResolver<'a> {
    pub fn new(
        cache: &'a QueryCache,
        backend: &'a dyn ReservationBackend,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            cache,
            backend,
            ceiling: config.fanout_ceiling,
            limit: config.fanout_limit,
            concurrency: config.fanout_concurrency.max(1),
        }
    }

    /// Per-call limit; overrides the configured one
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        if limit.is_some() {
            self.limit = limit;
        }
        self
    }

    pub async fn resolve(&self, subject: &Subject, count: u64) -> KeyResolution {
        let bound = fanout_bound(count, self.limit, self.ceiling);
        if bound < count {
            debug!(subject = %subject, count, bound, "Key fan-out capped");
        }

        // Legs finish in any order; a stuck one holds a single slot
        let mut legs: Vec<(u64, Leg)> = stream::iter(0..bound)
            .map(|index| async move { (index, self.leg(subject, count, index).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        legs.sort_by_key(|(index, _)| *index);

        let mut resolution = KeyResolution::default();
        for (_, leg) in legs {
            match leg {
                Leg::Resolved(key, stale) => {
                    resolution.attempted += 1;
                    resolution.is_stale |= stale;
                    if let Some(key) = key {
                        if !resolution.keys.contains(&key) {
                            resolution.keys.push(key);
                        }
                    }
                }
                Leg::Skipped => resolution.skipped += 1,
                Leg::Failed(failure) => {
                    resolution.attempted += 1;
                    resolution.failures.push(failure);
                }
            }
        }

        debug!(
            subject = %subject,
            keys = resolution.keys.len(),
            failed = resolution.failures.len(),
            skipped = resolution.skipped,
            "Keys resolved"
        );
        resolution
    }

    /// Look up one index, re-checking the bound against the latest cached count
    async fn leg(&self, subject: &Subject, count: u64, index: u64) -> Leg {
        let latest = self
            .cache
            .peek_count(subject)
            .map(|served| served.value)
            .unwrap_or(count);
        if index >= fanout_bound(latest, self.limit, self.ceiling) {
            return Leg::Skipped;
        }

        match self.cache.key_at(self.backend, subject, index).await {
            Ok(served) => {
                let stale = served.is_stale();
                Leg::Resolved(served.value, stale)
            }
            Err(e) => {
                warn!(subject = %subject, index, error = %e, "Key lookup failed");
                Leg::Failed(PartialFailure::new(FailureStage::KeyAtIndex, index, &e))
            }
        }
    }
}
