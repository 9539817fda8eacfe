//! Read backends for reservation data
//!
//! Two equivalent read paths exist, one per identity mode:
//!
//! - **Wallet**: contract views exposed over HTTP, keyed by wallet address
//! - **Institutional**: the SSO API, authenticated by an institutional session
//!
//! Both normalize their responses into the same shapes, so the pipeline is
//! written once against [`ReservationBackend`]. The [`BackendRouter`] picks
//! exactly one path per subject; the two serve disjoint subject populations
//! and never fall back to each other.

pub mod http;
pub mod institutional;
pub mod memory;
pub mod normalize;
pub mod router;
pub mod wallet;

pub use http::{HttpBackendConfig, JsonClient};
pub use institutional::InstitutionalBackend;
pub use memory::{Fixture, InMemoryBackend, ANY_ITEM};
pub use router::BackendRouter;
pub use wallet::WalletBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{
    BackendResult, Lab, LabId, LabMetadata, LabOwner, RecordLookup, ReservationKey, Subject,
};

/// Read operations exposed by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOperation {
    Count,
    KeyAt,
    Reservation,
    Lab,
    LabMetadata,
    LabOwner,
}

impl ReadOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::KeyAt => "key_at",
            Self::Reservation => "reservation",
            Self::Lab => "lab",
            Self::LabMetadata => "lab_metadata",
            Self::LabOwner => "lab_owner",
        }
    }
}

impl fmt::Display for ReadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized read interface shared by both identity paths
#[async_trait]
pub trait ReservationBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Total reservations owned by the subject
    async fn reservation_count(&self, subject: &Subject) -> BackendResult<u64>;

    /// Key of the subject's reservation at `index`; `None` when there is none
    async fn reservation_key_at(
        &self,
        subject: &Subject,
        index: u64,
    ) -> BackendResult<Option<ReservationKey>>;

    /// Full reservation for a key
    async fn reservation(&self, key: &ReservationKey) -> BackendResult<RecordLookup>;

    /// Base lab entity
    async fn lab(&self, lab_id: LabId) -> BackendResult<Lab>;

    /// Lab metadata document at `uri`
    async fn lab_metadata(&self, uri: &str) -> BackendResult<LabMetadata>;

    /// Lab owner
    async fn lab_owner(&self, lab_id: LabId) -> BackendResult<LabOwner>;
}
