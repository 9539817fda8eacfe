//! Institutional read path: the SSO API, authenticated per institutional session
//!
//! Subject-scoped reads carry the session identifier in the `x-session-id`
//! header; record and lab reads are not user-scoped and rely on the
//! service-level bearer token only.

use async_trait::async_trait;
use tracing::debug;

use super::http::{HttpBackendConfig, JsonClient};
use super::normalize;
use super::ReservationBackend;
use crate::types::{
    BackendError, BackendResult, Lab, LabId, LabMetadata, LabOwner, RecordLookup, ReservationKey,
    Subject,
};

const RESERVATIONS_PATH: &str = "/api/institution/reservations";
const LABS_PATH: &str = "/api/institution/labs";
const METADATA_PATH: &str = "/api/metadata";

/// Header carrying the institutional session identifier
pub const SESSION_HEADER: &str = "x-session-id";

/// Reads reservation state for institution-authenticated users and labs
pub struct InstitutionalBackend {
    client: JsonClient,
    /// Session used for lab-scoped reads, where the subject carries none
    service_session: Option<String>,
}

impl InstitutionalBackend {
    pub fn new(config: &HttpBackendConfig) -> BackendResult<Self> {
        Ok(Self {
            client: JsonClient::new(config)?,
            service_session: None,
        })
    }

    /// Session to present for lab subjects
    pub fn with_service_session(mut self, session: impl Into<String>) -> Self {
        self.service_session = Some(session.into());
        self
    }

    /// Query parameters and headers for a subject-scoped read
    fn scope(
        &self,
        subject: &Subject,
    ) -> BackendResult<(Vec<(&'static str, String)>, Vec<(&'static str, String)>)> {
        match subject {
            Subject::Institution { session } => {
                Ok((Vec::new(), vec![(SESSION_HEADER, session.clone())]))
            }
            Subject::Lab { lab_id, .. } => {
                let headers = self
                    .service_session
                    .iter()
                    .map(|s| (SESSION_HEADER, s.clone()))
                    .collect();
                Ok((vec![("labId", lab_id.to_string())], headers))
            }
            Subject::Wallet { .. } => Err(BackendError::InvalidInput(
                "institutional path cannot resolve a wallet subject".into(),
            )),
        }
    }
}

#[async_trait]
impl ReservationBackend for InstitutionalBackend {
    fn name(&self) -> &'static str {
        "institutional"
    }

    async fn reservation_count(&self, subject: &Subject) -> BackendResult<u64> {
        let (query, headers) = self.scope(subject)?;
        let body = self
            .client
            .get_with_headers(&format!("{}/count", RESERVATIONS_PATH), &query, &headers)
            .await?;
        normalize::parse_count(&body)
    }

    async fn reservation_key_at(
        &self,
        subject: &Subject,
        index: u64,
    ) -> BackendResult<Option<ReservationKey>> {
        let (mut query, headers) = self.scope(subject)?;
        query.push(("index", index.to_string()));
        let path = format!("{}/key", RESERVATIONS_PATH);
        match self.client.get_with_headers(&path, &query, &headers).await {
            Ok(body) => normalize::parse_key(&body),
            Err(e) if e.is_not_found() => {
                debug!(subject = %subject, index, "No reservation key at index");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn reservation(&self, key: &ReservationKey) -> BackendResult<RecordLookup> {
        let path = format!("{}/detail", RESERVATIONS_PATH);
        match self
            .client
            .get(&path, &[("reservationKey", key.to_string())])
            .await
        {
            Ok(body) => normalize::parse_record(key, &body),
            Err(e) if e.is_not_found() => Ok(RecordLookup::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn lab(&self, lab_id: LabId) -> BackendResult<Lab> {
        let body = self
            .client
            .get(&format!("{}/detail", LABS_PATH), &[("labId", lab_id.to_string())])
            .await?;
        normalize::parse_lab(lab_id, &body)
    }

    async fn lab_metadata(&self, uri: &str) -> BackendResult<LabMetadata> {
        let body = self
            .client
            .get(METADATA_PATH, &[("uri", uri.to_string())])
            .await?;
        normalize::parse_metadata(&body)
    }

    async fn lab_owner(&self, lab_id: LabId) -> BackendResult<LabOwner> {
        let body = self
            .client
            .get(&format!("{}/owner", LABS_PATH), &[("labId", lab_id.to_string())])
            .await?;
        normalize::parse_owner(&body)
    }
}
