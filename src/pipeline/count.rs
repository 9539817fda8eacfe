//! Count resolution, the root of every pipeline run

use tracing::debug;

use crate::backend::ReservationBackend;
use crate::cache::QueryCache;
use crate::types::{PipelineError, Result, Subject};

/// Resolved reservation count for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountResolution {
    pub count: u64,
    /// Served from a stale entry after a failed refetch
    pub is_stale: bool,
    /// False when the subject was not resolvable and no request was made
    pub enabled: bool,
}

/// Resolve the count of reservations owned by `subject`.
///
/// An unresolvable subject disables the resolver: the cached value (or 0)
/// is returned without a request. A transport failure is a root failure.
pub async fn resolve_count(
    cache: &QueryCache,
    backend: &dyn ReservationBackend,
    subject: &Subject,
) -> Result<CountResolution> {
    if !subject.is_resolvable() {
        let cached = cache.peek_count(subject);
        debug!(subject = %subject, cached = cached.is_some(), "Count resolver disabled");
        return Ok(CountResolution {
            count: cached.as_ref().map(|s| s.value).unwrap_or(0),
            is_stale: cached.map(|s| s.is_stale()).unwrap_or(false),
            enabled: false,
        });
    }

    let served = cache
        .count(backend, subject)
        .await
        .map_err(|source| PipelineError::RootFailure {
            subject: subject.to_string(),
            source,
        })?;

    Ok(CountResolution {
        count: served.value,
        is_stale: served.is_stale(),
        enabled: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, ReadOperation, ANY_ITEM};
    use crate::types::BackendError;

    #[tokio::test]
    async fn test_unresolvable_subject_makes_no_request() {
        let backend = InMemoryBackend::new("memory");
        let cache = QueryCache::with_defaults();

        let resolution = resolve_count(&cache, &backend, &Subject::wallet("0x12"))
            .await
            .unwrap();
        assert_eq!(resolution.count, 0);
        assert!(!resolution.enabled);
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_root_failure() {
        let backend = InMemoryBackend::new("memory");
        backend.fail_always(
            ReadOperation::Count,
            ANY_ITEM,
            BackendError::Network("refused".into()),
        );
        let cache = QueryCache::new(crate::cache::CacheConfig {
            retry_backoff: std::time::Duration::from_millis(1),
            ..Default::default()
        });

        let err = resolve_count(&cache, &backend, &Subject::institution("s"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RootFailure { .. }));
        assert!(err.is_retryable());
    }
}
