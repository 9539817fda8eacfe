//! Per-item failures absorbed into a composed result

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{BackendError, PipelineError, Result};

/// Pipeline stage a failed item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    KeyAtIndex,
    Record,
    Lab,
    LabMetadata,
    LabOwner,
}

impl FailureStage {
    /// Fan-out legs count towards the escalation ratio; enrichment never does
    pub fn is_leg(&self) -> bool {
        matches!(self, Self::KeyAtIndex | Self::Record)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyAtIndex => "key_at_index",
            Self::Record => "record",
            Self::Lab => "lab",
            Self::LabMetadata => "lab_metadata",
            Self::LabOwner => "lab_owner",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialFailure {
    pub stage: FailureStage,
    /// Index, key or lab id of the failed item
    pub item: String,
    pub cause: String,
}

impl PartialFailure {
    pub fn new(stage: FailureStage, item: impl fmt::Display, cause: &BackendError) -> Self {
        Self {
            stage,
            item: item.to_string(),
            cause: cause.to_string(),
        }
    }

    /// The backend answered that the item does not exist
    pub fn missing(stage: FailureStage, item: impl fmt::Display) -> Self {
        Self {
            stage,
            item: item.to_string(),
            cause: "Not found".to_string(),
        }
    }
}

/// What to do when fan-out legs fail
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LegFailurePolicy {
    /// Always return the partial result
    #[default]
    Tolerate,
    /// Fail the resolution when more than `max_ratio` of attempted legs failed
    EscalateAbove { max_ratio: f64 },
}

impl LegFailurePolicy {
    pub fn check(&self, failed: usize, attempted: usize) -> Result<()> {
        match *self {
            Self::Tolerate => Ok(()),
            Self::EscalateAbove { max_ratio } => {
                if attempted > 0 && failed as f64 / attempted as f64 > max_ratio {
                    Err(PipelineError::LegFailuresExceeded { failed, attempted })
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_carries_cause() {
        let failure = PartialFailure::new(
            FailureStage::Record,
            "0xabc",
            &BackendError::Timeout("/r".into()),
        );
        assert_eq!(failure.item, "0xabc");
        assert!(failure.cause.contains("timed out"));

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["stage"], "record");
    }

    #[test]
    fn test_tolerate_never_escalates() {
        assert!(LegFailurePolicy::Tolerate.check(10, 10).is_ok());
    }

    #[test]
    fn test_escalate_above_ratio() {
        let policy = LegFailurePolicy::EscalateAbove { max_ratio: 0.5 };
        assert!(policy.check(1, 2).is_ok());
        assert!(matches!(
            policy.check(2, 3),
            Err(PipelineError::LegFailuresExceeded { failed: 2, attempted: 3 })
        ));
        assert!(policy.check(0, 0).is_ok());
    }

    #[test]
    fn test_enrichment_stages_are_not_legs() {
        assert!(FailureStage::Record.is_leg());
        assert!(!FailureStage::LabOwner.is_leg());
    }
}
