//! Wallet read path: contract views served over HTTP, keyed by wallet address

use async_trait::async_trait;
use tracing::debug;

use super::http::{HttpBackendConfig, JsonClient};
use super::normalize;
use super::ReservationBackend;
use crate::types::{
    BackendError, BackendResult, Lab, LabId, LabMetadata, LabOwner, RecordLookup, ReservationKey,
    Subject,
};

const RESERVATION_PATH: &str = "/api/contract/reservation";
const LAB_PATH: &str = "/api/contract/lab";
const METADATA_PATH: &str = "/api/metadata";

/// Reads reservation state for wallet-connected users and labs
pub struct WalletBackend {
    client: JsonClient,
}

impl WalletBackend {
    pub fn new(config: &HttpBackendConfig) -> BackendResult<Self> {
        Ok(Self {
            client: JsonClient::new(config)?,
        })
    }

    fn subject_query(subject: &Subject) -> BackendResult<(&'static str, (&'static str, String))> {
        match subject {
            Subject::Wallet { address } => {
                Ok(("reservationsOf", ("wallet", address.clone())))
            }
            Subject::Lab { lab_id, .. } => {
                Ok(("getReservationsOfToken", ("labId", lab_id.to_string())))
            }
            Subject::Institution { .. } => Err(BackendError::InvalidInput(
                "wallet path cannot resolve an institutional session".into(),
            )),
        }
    }
}

#[async_trait]
impl ReservationBackend for WalletBackend {
    fn name(&self) -> &'static str {
        "wallet"
    }

    async fn reservation_count(&self, subject: &Subject) -> BackendResult<u64> {
        let (op, param) = Self::subject_query(subject)?;
        let body = self
            .client
            .get(&format!("{}/{}", RESERVATION_PATH, op), &[param])
            .await?;
        normalize::parse_count(&body)
    }

    async fn reservation_key_at(
        &self,
        subject: &Subject,
        index: u64,
    ) -> BackendResult<Option<ReservationKey>> {
        let (_, param) = Self::subject_query(subject)?;
        let op = match subject {
            Subject::Lab { .. } => "getReservationOfTokenByIndex",
            _ => "reservationKeyOfUserByIndex",
        };
        let path = format!("{}/{}", RESERVATION_PATH, op);
        match self.client.get(&path, &[param, ("index", index.to_string())]).await {
            Ok(body) => normalize::parse_key(&body),
            Err(e) if e.is_not_found() => {
                debug!(subject = %subject, index, "No reservation key at index");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn reservation(&self, key: &ReservationKey) -> BackendResult<RecordLookup> {
        let path = format!("{}/getReservation", RESERVATION_PATH);
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
            .get(&format!("{}/getLab", LAB_PATH), &[("labId", lab_id.to_string())])
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
            .get(&format!("{}/ownerOf", LAB_PATH), &[("labId", lab_id.to_string())])
            .await?;
        normalize::parse_owner(&body)
    }
}
