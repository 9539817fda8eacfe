//! In-memory backend for tests and offline runs
//!
//! Serves reservation state from a [`Fixture`], counts calls per operation
//! and can inject transport faults, latency and calls that never return,
//! which makes cache, retry and fan-out behavior observable without a network.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use super::{ReadOperation, ReservationBackend};
use crate::types::{
    BackendError, BackendResult, Lab, LabId, LabMetadata, LabOwner, RecordLookup, Reservation,
    ReservationKey, Subject,
};

/// Wildcard item for fault injection
pub const ANY_ITEM: &str = "*";

/// Serializable backend contents.
///
/// Subject-scoped maps are keyed by the wallet address, the raw session
/// identifier, or `lab:<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub counts: HashMap<String, u64>,
    #[serde(default)]
    pub keys: HashMap<String, Vec<ReservationKey>>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    #[serde(default)]
    pub labs: Vec<Lab>,
    #[serde(default)]
    pub metadata: HashMap<String, LabMetadata>,
    #[serde(default)]
    pub owners: HashMap<LabId, LabOwner>,
}

impl Fixture {
    /// Fixture map key for a subject
    pub fn scope(subject: &Subject) -> String {
        match subject {
            Subject::Wallet { address } => address.clone(),
            Subject::Institution { session } => session.clone(),
            Subject::Lab { lab_id, .. } => format!("lab:{}", lab_id),
        }
    }
}

#[derive(Default)]
struct State {
    counts: HashMap<String, u64>,
    keys: HashMap<String, Vec<ReservationKey>>,
    reservations: HashMap<ReservationKey, Reservation>,
    labs: HashMap<LabId, Lab>,
    metadata: HashMap<String, LabMetadata>,
    owners: HashMap<LabId, LabOwner>,
}

impl From<Fixture> for State {
    fn from(fixture: Fixture) -> Self {
        Self {
            counts: fixture.counts,
            keys: fixture.keys,
            reservations: fixture
                .reservations
                .into_iter()
                .map(|r| (r.key.clone(), r))
                .collect(),
            labs: fixture.labs.into_iter().map(|l| (l.id, l)).collect(),
            metadata: fixture.metadata,
            owners: fixture.owners,
        }
    }
}

struct Fault {
    remaining: usize,
    error: BackendError,
}

/// Fixture-backed [`ReservationBackend`]
pub struct InMemoryBackend {
    name: &'static str,
    state: RwLock<State>,
    calls: DashMap<ReadOperation, usize>,
    faults: DashMap<(ReadOperation, String), Fault>,
    stalled: DashSet<(ReadOperation, String)>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new(name: &'static str) -> Self {
        Self::from_fixture(name, Fixture::default())
    }

    pub fn from_fixture(name: &'static str, fixture: Fixture) -> Self {
        Self {
            name,
            state: RwLock::new(State::from(fixture)),
            calls: DashMap::new(),
            faults: DashMap::new(),
            stalled: DashSet::new(),
            latency: None,
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace a subject's key list; the count follows the list length
    pub fn set_keys(&self, subject: &Subject, keys: Vec<ReservationKey>) {
        let scope = Fixture::scope(subject);
        let mut state = self.write();
        state.counts.insert(scope.clone(), keys.len() as u64);
        state.keys.insert(scope, keys);
    }

    /// Override the reported count independently of the key list
    pub fn set_count(&self, subject: &Subject, count: u64) {
        self.write().counts.insert(Fixture::scope(subject), count);
    }

    pub fn insert_reservation(&self, reservation: Reservation) {
        self.write()
            .reservations
            .insert(reservation.key.clone(), reservation);
    }

    pub fn remove_reservation(&self, key: &ReservationKey) -> Option<Reservation> {
        self.write().reservations.remove(key)
    }

    pub fn insert_lab(&self, lab: Lab) {
        self.write().labs.insert(lab.id, lab);
    }

    pub fn insert_metadata(&self, uri: impl Into<String>, metadata: LabMetadata) {
        self.write().metadata.insert(uri.into(), metadata);
    }

    pub fn insert_owner(&self, lab_id: LabId, owner: LabOwner) {
        self.write().owners.insert(lab_id, owner);
    }

    /// Fail the next `times` calls of `op` on `item` (or [`ANY_ITEM`])
    pub fn fail_times(&self, op: ReadOperation, item: &str, times: usize, error: BackendError) {
        self.faults.insert(
            (op, item.to_string()),
            Fault {
                remaining: times,
                error,
            },
        );
    }

    /// Fail every call of `op` on `item`
    pub fn fail_always(&self, op: ReadOperation, item: &str, error: BackendError) {
        self.fail_times(op, item, usize::MAX, error);
    }

    /// Calls of `op` on `item` (or [`ANY_ITEM`]) never complete
    pub fn stall(&self, op: ReadOperation, item: &str) {
        self.stalled.insert((op, item.to_string()));
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
        self.stalled.clear();
    }

    /// Calls received for `op`, failed ones included
    pub fn calls(&self, op: ReadOperation) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }

    /// Record the call, apply latency and injected faults
    async fn enter(&self, op: ReadOperation, item: &str) -> BackendResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let stalled = [item, ANY_ITEM]
            .iter()
            .any(|candidate| self.stalled.contains(&(op, candidate.to_string())));
        if stalled {
            std::future::pending::<()>().await;
        }

        for candidate in [item, ANY_ITEM] {
            if let Some(mut fault) = self.faults.get_mut(&(op, candidate.to_string())) {
                if fault.remaining > 0 {
                    if fault.remaining != usize::MAX {
                        fault.remaining -= 1;
                    }
                    return Err(fault.error.clone());
                }
            }
        }
        Ok(())
    }

    fn missing(op: ReadOperation, item: &str) -> BackendError {
        BackendError::Status {
            code: 404,
            url: format!("memory://{}/{}", op, item),
        }
    }
}

#[async_trait]
impl ReservationBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn reservation_count(&self, subject: &Subject) -> BackendResult<u64> {
        let scope = Fixture::scope(subject);
        self.enter(ReadOperation::Count, &scope).await?;
        let state = self.read();
        Ok(state
            .counts
            .get(&scope)
            .copied()
            .or_else(|| state.keys.get(&scope).map(|k| k.len() as u64))
            .unwrap_or(0))
    }

    async fn reservation_key_at(
        &self,
        subject: &Subject,
        index: u64,
    ) -> BackendResult<Option<ReservationKey>> {
        self.enter(ReadOperation::KeyAt, &index.to_string()).await?;
        let state = self.read();
        Ok(state
            .keys
            .get(&Fixture::scope(subject))
            .and_then(|keys| keys.get(index as usize))
            .cloned())
    }

    async fn reservation(&self, key: &ReservationKey) -> BackendResult<RecordLookup> {
        self.enter(ReadOperation::Reservation, key.as_str()).await?;
        Ok(self
            .read()
            .reservations
            .get(key)
            .cloned()
            .map(RecordLookup::Found)
            .unwrap_or(RecordLookup::NotFound))
    }

    async fn lab(&self, lab_id: LabId) -> BackendResult<Lab> {
        let item = lab_id.to_string();
        self.enter(ReadOperation::Lab, &item).await?;
        self.read()
            .labs
            .get(&lab_id)
            .cloned()
            .ok_or_else(|| Self::missing(ReadOperation::Lab, &item))
    }

    async fn lab_metadata(&self, uri: &str) -> BackendResult<LabMetadata> {
        self.enter(ReadOperation::LabMetadata, uri).await?;
        self.read()
            .metadata
            .get(uri)
            .cloned()
            .ok_or_else(|| Self::missing(ReadOperation::LabMetadata, uri))
    }

    async fn lab_owner(&self, lab_id: LabId) -> BackendResult<LabOwner> {
        let item = lab_id.to_string();
        self.enter(ReadOperation::LabOwner, &item).await?;
        self.read()
            .owners
            .get(&lab_id)
            .cloned()
            .ok_or_else(|| Self::missing(ReadOperation::LabOwner, &item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawStatus;

    fn key(n: u8) -> ReservationKey {
        ReservationKey::parse(&format!("0x{}", hex::encode([n; 32]))).unwrap()
    }

    #[tokio::test]
    async fn test_serves_fixture_and_counts_calls() {
        let backend = InMemoryBackend::new("memory");
        let subject = Subject::institution("sess");
        backend.set_keys(&subject, vec![key(1), key(2)]);
        backend.insert_reservation(Reservation::new(key(1), 4, RawStatus::Pending));

        assert_eq!(backend.reservation_count(&subject).await.unwrap(), 2);
        assert_eq!(backend.reservation_key_at(&subject, 1).await.unwrap(), Some(key(2)));
        assert_eq!(backend.reservation_key_at(&subject, 2).await.unwrap(), None);
        assert!(matches!(
            backend.reservation(&key(1)).await.unwrap(),
            RecordLookup::Found(_)
        ));
        assert_eq!(backend.reservation(&key(9)).await.unwrap(), RecordLookup::NotFound);

        assert_eq!(backend.calls(ReadOperation::KeyAt), 2);
        assert_eq!(backend.total_calls(), 5);
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let backend = InMemoryBackend::new("memory");
        backend.fail_times(
            ReadOperation::Lab,
            "3",
            1,
            BackendError::Network("reset".into()),
        );
        backend.insert_lab(Lab {
            id: 3,
            ..Default::default()
        });

        assert!(backend.lab(3).await.is_err());
        assert_eq!(backend.lab(3).await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_wildcard_fault_and_missing_lab() {
        let backend = InMemoryBackend::new("memory");
        backend.fail_always(ReadOperation::LabOwner, ANY_ITEM, BackendError::Timeout("x".into()));
        assert!(matches!(backend.lab_owner(1).await, Err(BackendError::Timeout(_))));
        assert!(backend.lab(1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stalled_call_never_returns() {
        let backend = InMemoryBackend::new("memory");
        backend.stall(ReadOperation::Lab, "1");
        let stuck = tokio::time::timeout(Duration::from_millis(20), backend.lab(1)).await;
        assert!(stuck.is_err());
        assert!(backend.lab(2).await.unwrap_err().is_not_found());

        backend.clear_faults();
        assert!(backend.lab(1).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_fixture_deserializes() {
        let raw = format!(
            r#"{{
                "keys": {{ "lab:5": ["0x{k}"] }},
                "owners": {{ "5": {{ "address": "0xowner" }} }}
            }}"#,
            k = "ab".repeat(32)
        );
        let fixture: Fixture = serde_json::from_str(&raw).unwrap();
        assert_eq!(fixture.keys["lab:5"].len(), 1);
        assert_eq!(fixture.owners[&5].address, "0xowner");
    }
}
