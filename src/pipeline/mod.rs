//! Dependent-query pipeline
//!
//! A resolution runs these stages, each feeding the next:
//!
//! 1. [`count`]: how many reservations the subject owns (root; failure aborts)
//! 2. [`keys`]: one key lookup per index, bounded by a fan-out ceiling
//! 3. [`records`]: one record lookup per key; negatives dropped
//! 4. [`status`]: lifecycle category per record
//! 5. [`enrich`]: lab details joined once per distinct lab id (optional)
//! 6. [`optimistic`]: locally pending bookings merged in, confirmed wins
//! 7. [`aggregate`]: summary counts and recent activity
//!
//! [`BookingsComposer`] wires the stages together.

pub mod aggregate;
pub mod composer;
pub mod count;
pub mod enrich;
pub mod failures;
pub mod keys;
pub mod optimistic;
pub mod records;
pub mod status;

pub use aggregate::{recent_activity, Summary};
pub use composer::{BookingsComposer, ComposedBookings, ResolveOptions};
pub use count::{resolve_count, CountResolution};
pub use enrich::{enrich_labs, Enrichment};
pub use failures::{FailureStage, LegFailurePolicy, PartialFailure};
pub use keys::{fanout_bound, IndexKeyResolver, KeyResolution};
pub use optimistic::{merge_optimistic, OptimisticRecord, OptimisticStore};
pub use records::{resolve_records, RecordResolution};
pub use status::classify;

use std::time::Duration;

use crate::types::{PipelineError, Result};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard cap on key lookups per resolution
    pub fanout_ceiling: u64,
    /// Default per-call cap below the ceiling
    pub fanout_limit: Option<u64>,
    /// Lookups in flight at once per fan-out stage
    pub fanout_concurrency: usize,
    /// Start-time distance within which a confirmed booking supersedes an optimistic one
    pub optimistic_tolerance: Duration,
    /// Lifetime of an unconfirmed optimistic booking
    pub optimistic_ttl: Duration,
    pub recent_limit: usize,
    pub recent_window: Duration,
    /// Never join lab details, regardless of per-call options
    pub skip_enrichment: bool,
    pub failure_policy: LegFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fanout_ceiling: 100,
            fanout_limit: None,
            fanout_concurrency: 16,
            optimistic_tolerance: Duration::from_secs(60),
            optimistic_ttl: Duration::from_secs(10 * 60),
            recent_limit: 5,
            recent_window: Duration::from_secs(30 * 24 * 60 * 60),
            skip_enrichment: false,
            failure_policy: LegFailurePolicy::Tolerate,
        }
    }
}

impl PipelineConfig {
    /// Reject settings no resolution can run with
    pub fn validate(&self) -> Result<()> {
        if self.fanout_ceiling == 0 {
            return Err(PipelineError::Config("fan-out ceiling must be at least 1".into()));
        }
        if self.fanout_concurrency == 0 {
            return Err(PipelineError::Config("fan-out concurrency must be at least 1".into()));
        }
        if let LegFailurePolicy::EscalateAbove { max_ratio } = self.failure_policy {
            if !(0.0..=1.0).contains(&max_ratio) {
                return Err(PipelineError::Config(format!(
                    "failed leg ratio {} is outside 0..=1",
                    max_ratio
                )));
            }
        }
        Ok(())
    }
}
