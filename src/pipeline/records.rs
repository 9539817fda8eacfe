//! Key → record fan-out

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::failures::{FailureStage, PartialFailure};
use crate::backend::ReservationBackend;
use crate::cache::QueryCache;
use crate::types::{Reservation, ReservationKey};

/// Records resolved for a key list, in key order
#[derive(Debug, Clone, Default)]
pub struct RecordResolution {
    pub records: Vec<Reservation>,
    pub failures: Vec<PartialFailure>,
    pub attempted: usize,
    /// Not found, or owned by the zero address
    pub negatives: usize,
    pub is_stale: bool,
}

/// Fetch the full reservation for each key.
///
/// Negative answers are dropped silently; failed lookups become
/// [`PartialFailure`]s after the cache's retry policy gave up.
pub async fn resolve_records(
    cache: &QueryCache,
    backend: &dyn ReservationBackend,
    keys: &[ReservationKey],
    concurrency: usize,
) -> RecordResolution {
    // Lookups finish in any order; a stuck one holds a single slot
    let mut results: Vec<_> = stream::iter(keys.iter().enumerate())
        .map(|(position, key)| async move {
            (position, key, cache.reservation(backend, key).await)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(position, _, _)| *position);

    let mut resolution = RecordResolution {
        attempted: results.len(),
        ..Default::default()
    };

    for (_, key, result) in results {
        match result {
            Ok(served) => {
                resolution.is_stale |= served.is_stale();
                match served.value.into_existing() {
                    Some(record) => resolution.records.push(record),
                    None => {
                        debug!(reservation = %key.short(), "Reservation missing or unowned");
                        resolution.negatives += 1;
                    }
                }
            }
            Err(e) => {
                warn!(reservation = %key.short(), error = %e, "Reservation lookup failed");
                resolution
                    .failures
                    .push(PartialFailure::new(FailureStage::Record, key, &e));
            }
        }
    }

    resolution
}
