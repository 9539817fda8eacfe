//! Bookings composer
//!
//! Runs the full pipeline for one subject and folds the stage outputs into a
//! single [`ComposedBookings`]. The composer also tracks which subject is
//! active: starting a resolution for another subject (or disabling the
//! composer) abandons the one in flight, whose caller gets
//! [`PipelineError::Superseded`] instead of a result for the wrong subject.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregate::{recent_activity, Summary};
use super::count::resolve_count;
use super::enrich::{enrich_labs, Enrichment};
use super::failures::PartialFailure;
use super::keys::{fanout_bound, IndexKeyResolver};
use super::optimistic::{merge_optimistic, OptimisticRecord, OptimisticStore};
use super::records::resolve_records;
use super::status::classify;
use super::PipelineConfig;
use crate::backend::BackendRouter;
use crate::cache::QueryCache;
use crate::logging::{ResolutionEvent, ResolutionOutcome, UsageLogger};
use crate::types::{
    Booking, LabDetails, LabId, PipelineError, Reservation, ReservationKey, Result, Subject,
};

/// Per-call options
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Join lab details onto every booking
    pub include_details: bool,
    /// Cap on key lookups for this call
    pub limit: Option<u64>,
    /// Classification instant (unix seconds); the wall clock when unset
    pub now: Option<i64>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            include_details: true,
            limit: None,
            now: None,
        }
    }
}

impl ResolveOptions {
    pub fn without_details(mut self) -> Self {
        self.include_details = false;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn at(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    fn now(&self) -> i64 {
        self.now.unwrap_or_else(|| Utc::now().timestamp())
    }
}

/// Everything a bookings view renders for one subject
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedBookings {
    /// Cache scope of the subject
    pub subject: String,
    pub records: Vec<Booking>,
    pub summary: Summary,
    pub recent_activity: Vec<Booking>,
    pub partial_failures: Vec<PartialFailure>,
    /// Some part of the reservation list is not known yet
    pub is_loading: bool,
    /// Some lab details are not known yet
    pub is_loading_details: bool,
    /// Some value came from a stale entry after a failed refetch
    pub is_stale: bool,
    pub resolved_at: DateTime<Utc>,
}

impl ComposedBookings {
    pub fn optimistic_count(&self) -> usize {
        self.records.iter().filter(|b| b.is_optimistic).count()
    }

    /// Confirmed booking for `key`, if present
    pub fn find(&self, key: &ReservationKey) -> Option<&Booking> {
        self.records.iter().find(|b| b.key.as_ref() == Some(key))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LoadState {
    is_loading: bool,
    is_loading_details: bool,
    is_stale: bool,
}

/// Composes bookings for one active subject at a time
pub struct BookingsComposer {
    router: BackendRouter,
    cache: Arc<QueryCache>,
    optimistic: OptimisticStore,
    config: PipelineConfig,
    active: watch::Sender<Option<Subject>>,
    usage: Option<UsageLogger>,
}

impl BookingsComposer {
    pub fn new(router: BackendRouter, cache: Arc<QueryCache>, config: PipelineConfig) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            router,
            cache,
            optimistic: OptimisticStore::new(config.optimistic_tolerance, config.optimistic_ttl),
            config,
            active,
            usage: None,
        }
    }

    /// Record one usage event per resolution
    pub fn with_usage_logger(mut self, logger: UsageLogger) -> Self {
        self.usage = Some(logger);
        self
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn optimistic(&self) -> &OptimisticStore {
        &self.optimistic
    }

    pub fn active_subject(&self) -> Option<Subject> {
        self.active.borrow().clone()
    }

    /// Abandon any resolution in flight
    pub fn disable(&self) {
        self.active.send_replace(None);
        debug!("Composer disabled");
    }

    /// Resolve `subject`, making it the active subject.
    ///
    /// The pipeline is dropped as soon as another subject becomes active, so
    /// its in-flight requests are abandoned and no stale result is returned.
    pub async fn resolve(&self, subject: Subject, options: ResolveOptions) -> Result<ComposedBookings> {
        let started = Instant::now();
        self.active.send_replace(Some(subject.clone()));
        let mut active = self.active.subscribe();

        let result = {
            let pipeline = self.run(&subject, &options);
            tokio::pin!(pipeline);

            loop {
                tokio::select! {
                    result = &mut pipeline => {
                        break result.and_then(|composed| {
                            self.ensure_active(&subject)?;
                            Ok(composed)
                        });
                    }
                    changed = active.changed() => {
                        if changed.is_err() {
                            break (&mut pipeline).await;
                        }
                        if let Err(e) = self.ensure_active(&subject) {
                            debug!(subject = %subject, "Resolution abandoned");
                            break Err(e);
                        }
                    }
                }
            }
        };

        match &result {
            Ok(composed) => info!(
                subject = %subject,
                records = composed.records.len(),
                partial_failures = composed.partial_failures.len(),
                stale = composed.is_stale,
                duration_ms = started.elapsed().as_millis() as u64,
                "Bookings resolved"
            ),
            Err(PipelineError::Superseded { .. }) | Err(PipelineError::Disabled) => {}
            Err(e) => warn!(subject = %subject, error = %e, "Bookings resolution failed"),
        }

        self.record_usage(&subject, &result, started).await;
        result
    }

    /// Compose from cached values only, flagging whatever is still missing
    pub fn peek(&self, subject: &Subject, options: &ResolveOptions) -> ComposedBookings {
        let now = options.now();
        let mut state = LoadState::default();
        let mut records: Vec<Reservation> = Vec::new();

        let count = match self.cache.peek_count(subject) {
            Some(served) => {
                state.is_stale |= served.is_stale();
                Some(served.value)
            }
            None if !subject.is_resolvable() => Some(0),
            None => None,
        };

        match count {
            None => state.is_loading = true,
            Some(count) => {
                let limit = options.limit.or(self.config.fanout_limit);
                let bound = fanout_bound(count, limit, self.config.fanout_ceiling);
                let mut seen: Vec<ReservationKey> = Vec::new();

                for index in 0..bound {
                    let Some(served) = self.cache.peek_key_at(subject, index) else {
                        state.is_loading = true;
                        continue;
                    };
                    state.is_stale |= served.is_stale();
                    let Some(key) = served.value else { continue };
                    if seen.contains(&key) {
                        continue;
                    }

                    match self.cache.peek_reservation(&key) {
                        Some(lookup) => {
                            state.is_stale |= lookup.is_stale();
                            records.extend(lookup.value.into_existing());
                        }
                        None => state.is_loading = true,
                    }
                    seen.push(key);
                }
            }
        }

        let pending = self.optimistic.for_subject(subject);
        let enrichment = if self.enrichment_enabled(options) {
            let ids = records
                .iter()
                .map(|r| r.lab_id)
                .chain(pending.iter().map(|p| p.lab_id));
            let (enrichment, loading) = self.peek_details(ids);
            state.is_loading_details = loading;
            state.is_stale |= enrichment.is_stale;
            Some(enrichment)
        } else {
            None
        };

        let confirmed = self.classify_all(records, enrichment.as_ref(), now);
        self.compose(subject, confirmed, &pending, enrichment.as_ref(), Vec::new(), now, state)
    }

    /// Invalidate cached reads affected by a confirmed mutation
    pub fn confirm_mutation(&self, subject: &Subject, key: Option<&ReservationKey>) {
        self.cache.invalidate_after_mutation(subject, key);
        info!(
            subject = %subject,
            reservation = key.map(|k| k.short()).unwrap_or("-"),
            "Mutation confirmed, cache invalidated"
        );
    }

    /// Show a booking for `subject` before it is confirmed
    pub fn insert_optimistic(
        &self,
        subject: &Subject,
        lab_id: LabId,
        start: i64,
        end: Option<i64>,
    ) -> Uuid {
        self.optimistic
            .insert(OptimisticRecord::new(subject, lab_id, start, end))
    }

    /// Withdraw an optimistic booking, e.g. after its write failed
    pub fn remove_optimistic(&self, id: Uuid) -> bool {
        self.optimistic.remove(id).is_some()
    }

    /// Drop optimistic bookings confirmed out of band
    pub fn confirm_optimistic(&self, lab_id: LabId, start: i64) -> usize {
        self.optimistic.confirm(lab_id, start)
    }

    fn ensure_active(&self, subject: &Subject) -> Result<()> {
        match &*self.active.borrow() {
            Some(active) if active == subject => Ok(()),
            Some(_) => Err(PipelineError::Superseded {
                subject: subject.to_string(),
            }),
            None => Err(PipelineError::Disabled),
        }
    }

    fn enrichment_enabled(&self, options: &ResolveOptions) -> bool {
        options.include_details && !self.config.skip_enrichment
    }

    async fn run(&self, subject: &Subject, options: &ResolveOptions) -> Result<ComposedBookings> {
        self.config.validate()?;
        let now = options.now();
        let backend = self.router.for_subject(subject);
        let backend = backend.as_ref();

        let count = resolve_count(&self.cache, backend, subject).await?;
        let mut state = LoadState {
            is_stale: count.is_stale,
            ..Default::default()
        };
        let mut failures = Vec::new();
        let mut records = Vec::new();
        let mut failed_legs = 0;
        let mut attempted_legs = 0;

        if count.enabled && count.count > 0 {
            let keys = IndexKeyResolver::new(&self.cache, backend, &self.config)
                .with_limit(options.limit)
                .resolve(subject, count.count)
                .await;
            let resolved = resolve_records(
                &self.cache,
                backend,
                &keys.keys,
                self.config.fanout_concurrency,
            )
            .await;

            failed_legs = keys.failures.len() + resolved.failures.len();
            attempted_legs = keys.attempted + resolved.attempted;
            state.is_stale |= keys.is_stale || resolved.is_stale;
            failures.extend(keys.failures);
            failures.extend(resolved.failures);
            records = resolved.records;
        }

        self.config
            .failure_policy
            .check(failed_legs, attempted_legs)?;

        self.optimistic.expire();
        let pending = self.optimistic.for_subject(subject);

        let enrichment = if self.enrichment_enabled(options) {
            let ids = records
                .iter()
                .map(|r| r.lab_id)
                .chain(pending.iter().map(|p| p.lab_id));
            let enrichment = enrich_labs(&self.cache, backend, ids).await;
            state.is_stale |= enrichment.is_stale;
            failures.extend(enrichment.failures.iter().cloned());
            Some(enrichment)
        } else {
            None
        };

        let confirmed = self.classify_all(records, enrichment.as_ref(), now);
        let reconciled = self.optimistic.reconcile(&confirmed);
        if reconciled > 0 {
            debug!(subject = %subject, reconciled, "Optimistic bookings confirmed by read-back");
        }

        Ok(self.compose(
            subject,
            confirmed,
            &pending,
            enrichment.as_ref(),
            failures,
            now,
            state,
        ))
    }

    fn classify_all(
        &self,
        records: Vec<Reservation>,
        enrichment: Option<&Enrichment>,
        now: i64,
    ) -> Vec<Booking> {
        records
            .into_iter()
            .map(|record| {
                let category = classify(record.status, now, record.start, record.end);
                let lab = enrichment.map(|e| e.details_for(record.lab_id));
                Booking::confirmed(record, category, lab)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn compose(
        &self,
        subject: &Subject,
        confirmed: Vec<Booking>,
        pending: &[OptimisticRecord],
        enrichment: Option<&Enrichment>,
        partial_failures: Vec<PartialFailure>,
        now: i64,
        state: LoadState,
    ) -> ComposedBookings {
        let optimistic = pending
            .iter()
            .map(|p| p.to_booking(now, enrichment.map(|e| e.details_for(p.lab_id))))
            .collect();
        let records = merge_optimistic(confirmed, optimistic, self.config.optimistic_tolerance);

        ComposedBookings {
            subject: subject.to_string(),
            summary: Summary::from_bookings(&records),
            recent_activity: recent_activity(
                &records,
                now,
                self.config.recent_window,
                self.config.recent_limit,
            ),
            records,
            partial_failures,
            is_loading: state.is_loading,
            is_loading_details: state.is_loading_details,
            is_stale: state.is_stale,
            resolved_at: Utc::now(),
        }
    }

    /// Lab details from cache only; the flag is set when any piece is missing
    fn peek_details(&self, ids: impl IntoIterator<Item = LabId>) -> (Enrichment, bool) {
        let distinct: BTreeSet<LabId> = ids.into_iter().collect();
        let mut details = HashMap::new();
        let mut loading = false;
        let mut is_stale = false;

        for id in distinct {
            let base = self.cache.peek_lab(id);
            let owner = self.cache.peek_lab_owner(id);
            let lab = base.as_ref().and_then(|s| s.value.as_ref());
            let metadata = lab
                .and_then(|l| l.uri.as_deref())
                .and_then(|uri| self.cache.peek_lab_metadata(uri));

            let metadata_missing = match &base {
                Some(_) => lab.and_then(|l| l.uri.as_ref()).is_some() && metadata.is_none(),
                None => true,
            };
            loading |= base.is_none() || owner.is_none() || metadata_missing;
            is_stale |= base.as_ref().map(|s| s.is_stale()).unwrap_or(false)
                || owner.as_ref().map(|s| s.is_stale()).unwrap_or(false)
                || metadata.as_ref().map(|s| s.is_stale()).unwrap_or(false);

            details.insert(
                id,
                LabDetails::merge(
                    id,
                    lab,
                    metadata.as_ref().and_then(|s| s.value.as_ref()),
                    owner.as_ref().and_then(|s| s.value.as_ref()),
                ),
            );
        }

        (
            Enrichment {
                details,
                failures: Vec::new(),
                is_stale,
            },
            loading,
        )
    }

    async fn record_usage(
        &self,
        subject: &Subject,
        result: &Result<ComposedBookings>,
        started: Instant,
    ) {
        let Some(logger) = &self.usage else { return };

        let event = match result {
            Ok(composed) => ResolutionEvent::new(
                subject.to_string(),
                subject.mode(),
                ResolutionOutcome::Resolved,
            )
            .with_counts(
                composed.records.len(),
                composed.optimistic_count(),
                composed.partial_failures.len(),
            )
            .with_stale(composed.is_stale),
            Err(e) => ResolutionEvent::new(subject.to_string(), subject.mode(), e.into()),
        };

        let event = event
            .with_duration(started.elapsed().as_millis() as u64)
            .with_hit_rate(self.cache.stats().total().hit_rate());
        logger.log(event).await;
    }
}
