//! Cache key definitions
//!
//! Keys for backend reads, scoped by subject or entity id.

use std::fmt;

use crate::backend::ReadOperation;
use crate::types::subject::short_digest;
use crate::types::{LabId, ReservationKey, Subject};

/// Cache key for a backend read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub operation: ReadOperation,
    /// Subject scope or entity id
    pub scope: String,
    /// Index within the scope, when the read is indexed
    pub item: Option<String>,
}

impl QueryKey {
    pub fn count(subject: &Subject) -> Self {
        Self {
            operation: ReadOperation::Count,
            scope: subject.cache_scope(),
            item: None,
        }
    }

    pub fn key_at(subject: &Subject, index: u64) -> Self {
        Self {
            operation: ReadOperation::KeyAt,
            scope: subject.cache_scope(),
            item: Some(index.to_string()),
        }
    }

    pub fn reservation(key: &ReservationKey) -> Self {
        Self::by_id(ReadOperation::Reservation, key.as_str())
    }

    pub fn lab(lab_id: LabId) -> Self {
        Self::by_id(ReadOperation::Lab, &lab_id.to_string())
    }

    /// URIs are hashed for a shorter key
    pub fn lab_metadata(uri: &str) -> Self {
        Self::by_id(ReadOperation::LabMetadata, &short_digest(uri))
    }

    pub fn lab_owner(lab_id: LabId) -> Self {
        Self::by_id(ReadOperation::LabOwner, &lab_id.to_string())
    }

    fn by_id(operation: ReadOperation, id: &str) -> Self {
        Self {
            operation,
            scope: id.to_string(),
            item: None,
        }
    }

    /// Convert to storage key string
    pub fn to_storage_key(&self) -> String {
        match &self.item {
            Some(item) => format!("{}:{}:{}", self.operation, self.scope, item),
            None => format!("{}:{}", self.operation, self.scope),
        }
    }

    /// Pattern matching every indexed key of a subject
    pub fn key_list_pattern(subject: &Subject) -> String {
        format!("{}:{}:", ReadOperation::KeyAt, subject.cache_scope())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "{}({}, {})", self.operation, self.scope, item),
            None => write!(f, "{}({})", self.operation, self.scope),
        }
    }
}
