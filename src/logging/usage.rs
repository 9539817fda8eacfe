//! Resolution usage log
//!
//! Writes one event per resolution in JSONL format, for offline analysis of
//! fan-out width, failure rates and cache effectiveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::types::{IdentityMode, PipelineError};

/// How a resolution ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved,
    RootFailure,
    Superseded,
    Disabled,
    LegFailuresExceeded,
    ConfigError,
}

impl From<&PipelineError> for ResolutionOutcome {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::RootFailure { .. } => Self::RootFailure,
            PipelineError::Superseded { .. } => Self::Superseded,
            PipelineError::Disabled => Self::Disabled,
            PipelineError::LegFailuresExceeded { .. } => Self::LegFailuresExceeded,
            PipelineError::Config(_) => Self::ConfigError,
        }
    }
}

/// One resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEvent {
    pub timestamp: DateTime<Utc>,
    /// Cache scope of the subject; never a raw session id
    pub subject: String,
    pub mode: IdentityMode,
    pub outcome: ResolutionOutcome,
    /// Bookings returned, optimistic ones included
    pub records: usize,
    pub optimistic: usize,
    pub partial_failures: usize,
    pub is_stale: bool,
    pub duration_ms: u64,
    /// Cache hit rate over the process lifetime, as a percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate: Option<f64>,
}

impl ResolutionEvent {
    pub fn new(subject: String, mode: IdentityMode, outcome: ResolutionOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            subject,
            mode,
            outcome,
            records: 0,
            optimistic: 0,
            partial_failures: 0,
            is_stale: false,
            duration_ms: 0,
            cache_hit_rate: None,
        }
    }

    pub fn with_counts(mut self, records: usize, optimistic: usize, partial_failures: usize) -> Self {
        self.records = records;
        self.optimistic = optimistic;
        self.partial_failures = partial_failures;
        self
    }

    pub fn with_stale(mut self, is_stale: bool) -> Self {
        self.is_stale = is_stale;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_hit_rate(mut self, hit_rate: f64) -> Self {
        self.cache_hit_rate = Some(hit_rate);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Usage logger that writes events to a JSONL file
#[derive(Clone, Default)]
pub struct UsageLogger {
    inner: Arc<Mutex<UsageLoggerInner>>,
}

#[derive(Default)]
struct UsageLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    written: u64,
}

impl UsageLogger {
    /// Logger without a sink; events are dropped until [`Self::init_file`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Usage logging initialized to {}", path.display());
        Ok(())
    }

    /// Log a resolution event
    pub async fn log(&self, event: ResolutionEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize usage event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        let mut wrote = false;
        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write usage event: {}", e);
            } else {
                wrote = true;
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush usage log: {}", e);
            }
        }
        if wrote {
            inner.written += 1;
        }
    }

    /// Events written since initialization
    pub async fn written(&self) -> u64 {
        self.inner.lock().await.written
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_jsonl() {
        let event = ResolutionEvent::new(
            "wallet:0xabc".into(),
            IdentityMode::Wallet,
            ResolutionOutcome::Resolved,
        )
        .with_counts(3, 1, 0)
        .with_duration(12);

        let line = event.to_jsonl().unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["outcome"], "resolved");
        assert_eq!(value["mode"], "wallet");
        assert_eq!(value["records"], 3);
        assert!(value.get("cache_hit_rate").is_none());
    }

    #[test]
    fn test_outcome_from_error() {
        let err = PipelineError::Superseded {
            subject: "lab:1:wallet".into(),
        };
        assert_eq!(ResolutionOutcome::from(&err), ResolutionOutcome::Superseded);
    }

    #[tokio::test]
    async fn test_logger_appends_lines() {
        let path = std::env::temp_dir().join(format!("labdesk-usage-{}.jsonl", uuid::Uuid::new_v4()));
        let logger = UsageLogger::new();
        logger.init_file(path.clone()).await.unwrap();

        for outcome in [ResolutionOutcome::Resolved, ResolutionOutcome::RootFailure] {
            logger
                .log(ResolutionEvent::new("session:1".into(), IdentityMode::Institutional, outcome))
                .await;
        }

        assert_eq!(logger.written().await, 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_logger_without_sink_drops_events() {
        let logger = UsageLogger::new();
        logger
            .log(ResolutionEvent::new("x".into(), IdentityMode::Wallet, ResolutionOutcome::Disabled))
            .await;
        assert_eq!(logger.written().await, 0);
        assert!(logger.path().await.is_none());
    }
}
