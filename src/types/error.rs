//! Error types for labdesk
//!
//! Transport failures from the read API (`BackendError`) are kept apart from
//! failures of a whole resolution (`PipelineError`). Only a failed count
//! resolution aborts a pipeline; per-item failures are absorbed into
//! [`crate::pipeline::PartialFailure`] metadata.

/// Transport-level failure of a single read operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {code} from {url}")]
    Status { code: u16, url: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BackendError {
    /// Whether a retry can reasonably succeed (network, timeout, 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status { code, .. } => *code >= 500,
            Self::Decode(_) | Self::InvalidInput(_) => false,
        }
    }

    /// Whether the backend answered "does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { code: 404, .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        if err.is_timeout() {
            Self::Timeout(url)
        } else if let Some(status) = err.status() {
            Self::Status {
                code: status.as_u16(),
                url,
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {}", err))
    }
}

/// Failure of a whole resolution
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The subject's reservation count could not be resolved; no keys can be derived
    #[error("Failed to resolve reservation count for {subject}: {source}")]
    RootFailure {
        subject: String,
        #[source]
        source: BackendError,
    },

    /// The active subject changed while this resolution was in flight
    #[error("Resolution for {subject} was superseded")]
    Superseded { subject: String },

    #[error("Pipeline is disabled")]
    Disabled,

    #[error("{failed} of {attempted} fan-out legs failed")]
    LegFailuresExceeded { failed: usize, attempted: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether a caller should offer a retry (the error state of the dashboard)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RootFailure { source, .. } => source.is_transient(),
            Self::LegFailuresExceeded { .. } => true,
            Self::Superseded { .. } | Self::Disabled | Self::Config(_) => false,
        }
    }
}

/// Result type alias for backend reads
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Network("reset".into()).is_transient());
        assert!(BackendError::Timeout("/api".into()).is_transient());
        assert!(BackendError::Status { code: 502, url: "/x".into() }.is_transient());
        assert!(!BackendError::Status { code: 404, url: "/x".into() }.is_transient());
        assert!(!BackendError::Status { code: 400, url: "/x".into() }.is_transient());
        assert!(!BackendError::Decode("bad".into()).is_transient());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(BackendError::Status { code: 404, url: "/x".into() }.is_not_found());
        assert!(!BackendError::Network("x".into()).is_not_found());
    }

    #[test]
    fn test_root_failure_display_and_retry() {
        let err = PipelineError::RootFailure {
            subject: "wallet:0xabc".into(),
            source: BackendError::Network("connection refused".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("wallet:0xabc"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_retryable());
        assert!(!PipelineError::Disabled.is_retryable());
    }
}
