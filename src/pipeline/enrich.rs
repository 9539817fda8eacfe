//! Lab enrichment, joined once per distinct lab id

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use super::failures::{FailureStage, PartialFailure};
use crate::backend::ReservationBackend;
use crate::cache::{QueryCache, Served};
use crate::types::{BackendResult, LabDetails, LabId};

/// Details per lab id plus whatever could not be joined
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub details: HashMap<LabId, LabDetails>,
    pub failures: Vec<PartialFailure>,
    pub is_stale: bool,
}

impl Enrichment {
    /// Details for `lab_id`, or the fallback when it was never joined
    pub fn details_for(&self, lab_id: LabId) -> LabDetails {
        self.details
            .get(&lab_id)
            .cloned()
            .unwrap_or_else(|| LabDetails::fallback(lab_id))
    }
}

struct Joined {
    details: LabDetails,
    failures: Vec<PartialFailure>,
    is_stale: bool,
}

/// Join base lab, owner and metadata for every distinct id in `lab_ids`.
///
/// Never fails: each missing piece degrades the merged details and is
/// reported as a [`PartialFailure`].
pub async fn enrich_labs(
    cache: &QueryCache,
    backend: &dyn ReservationBackend,
    lab_ids: impl IntoIterator<Item = LabId>,
) -> Enrichment {
    let distinct: BTreeSet<LabId> = lab_ids.into_iter().collect();
    debug!(labs = distinct.len(), "Enriching labs");

    let joined = join_all(distinct.into_iter().map(|id| join_lab(cache, backend, id))).await;

    let mut enrichment = Enrichment::default();
    for lab in joined {
        enrichment.is_stale |= lab.is_stale;
        enrichment.failures.extend(lab.failures);
        enrichment.details.insert(lab.details.id, lab.details);
    }
    enrichment
}

async fn join_lab(cache: &QueryCache, backend: &dyn ReservationBackend, id: LabId) -> Joined {
    let mut failures = Vec::new();
    let mut is_stale = false;

    let (base, owner) = tokio::join!(cache.lab(backend, id), cache.lab_owner(backend, id));
    let base = settle(base, FailureStage::Lab, id, &mut failures, &mut is_stale);
    let owner = settle(owner, FailureStage::LabOwner, id, &mut failures, &mut is_stale);

    let metadata = match base.as_ref().and_then(|b| b.uri.as_deref()) {
        Some(uri) => {
            let result = cache.lab_metadata(backend, uri).await;
            settle(result, FailureStage::LabMetadata, id, &mut failures, &mut is_stale)
        }
        None => None,
    };

    Joined {
        details: LabDetails::merge(id, base.as_ref(), metadata.as_ref(), owner.as_ref()),
        failures,
        is_stale,
    }
}

fn settle<T>(
    result: BackendResult<Served<Option<T>>>,
    stage: FailureStage,
    id: LabId,
    failures: &mut Vec<PartialFailure>,
    is_stale: &mut bool,
) -> Option<T> {
    match result {
        Ok(served) => {
            *is_stale |= served.is_stale();
            if served.value.is_none() {
                debug!(lab_id = id, stage = %stage, "Lab detail does not exist");
                failures.push(PartialFailure::missing(stage, id));
            }
            served.value
        }
        Err(e) => {
            warn!(lab_id = id, stage = %stage, error = %e, "Lab enrichment failed");
            failures.push(PartialFailure::new(stage, id, &e));
            None
        }
    }
}
