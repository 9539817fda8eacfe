//! Optimistic bookings and their reconciliation with confirmed data
//!
//! A booking written by this client shows up immediately as an optimistic
//! record. It disappears when a confirmed reservation for the same lab with
//! a start within tolerance is read back, when the caller removes or
//! confirms it explicitly, or when it outlives its TTL.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::status::classify;
use crate::types::{Booking, LabDetails, LabId, RawStatus, Subject};

/// A locally synthesized reservation without a confirmed key
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticRecord {
    pub id: Uuid,
    /// Cache scope of the subject that made the booking
    pub scope: String,
    pub lab_id: LabId,
    pub start: i64,
    pub end: Option<i64>,
    pub status: RawStatus,
    pub renter: Option<String>,
    pub created_at: Instant,
}

impl OptimisticRecord {
    pub fn new(subject: &Subject, lab_id: LabId, start: i64, end: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope: subject.cache_scope(),
            lab_id,
            start,
            end,
            status: RawStatus::Pending,
            renter: match subject {
                Subject::Wallet { address } => Some(address.clone()),
                _ => None,
            },
            created_at: Instant::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }

    /// Render as a booking classified at `now`
    pub fn to_booking(&self, now: i64, lab: Option<LabDetails>) -> Booking {
        let lab_name = lab
            .as_ref()
            .map(|l| l.name.clone())
            .unwrap_or_else(|| LabDetails::fallback_name(self.lab_id));
        Booking {
            key: None,
            optimistic_id: Some(self.id),
            lab_id: self.lab_id,
            status: self.status,
            category: classify(self.status, now, Some(self.start), self.end),
            start: Some(self.start),
            end: self.end,
            renter: self.renter.clone(),
            price: None,
            provider: None,
            puc: None,
            lab_name,
            lab,
            is_optimistic: true,
        }
    }
}

/// Whether `confirmed` is the read-back of an optimistic booking at (`lab_id`, `start`)
fn matches(confirmed: &Booking, lab_id: LabId, start: i64, tolerance: Duration) -> bool {
    confirmed.lab_id == lab_id
        && confirmed
            .start
            .map(|s| s.abs_diff(start) <= tolerance.as_secs())
            .unwrap_or(false)
}

/// Union confirmed and optimistic bookings; confirmed always wins.
///
/// An optimistic booking is dropped when a confirmed booking has the same
/// lab id and a start within `tolerance`. Confirmed bookings come first.
pub fn merge_optimistic(
    confirmed: Vec<Booking>,
    optimistic: Vec<Booking>,
    tolerance: Duration,
) -> Vec<Booking> {
    let survivors: Vec<Booking> = optimistic
        .into_iter()
        .filter(|o| match o.start {
            Some(start) => !confirmed
                .iter()
                .filter(|c| !c.is_optimistic)
                .any(|c| matches(c, o.lab_id, start, tolerance)),
            None => true,
        })
        .collect();

    let mut merged = confirmed;
    merged.extend(survivors);
    merged
}

/// Pending optimistic bookings, keyed by lab id
pub struct OptimisticStore {
    entries: DashMap<LabId, Vec<OptimisticRecord>>,
    tolerance: Duration,
    ttl: Duration,
}

impl OptimisticStore {
    pub fn new(tolerance: Duration, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            tolerance,
            ttl,
        }
    }

    pub fn insert(&self, record: OptimisticRecord) -> Uuid {
        let id = record.id;
        debug!(id = %id, lab_id = record.lab_id, start = record.start, "Optimistic booking added");
        self.entries.entry(record.lab_id).or_default().push(record);
        id
    }

    pub fn remove(&self, id: Uuid) -> Option<OptimisticRecord> {
        let mut removed = None;
        for mut entry in self.entries.iter_mut() {
            if let Some(pos) = entry.iter().position(|r| r.id == id) {
                removed = Some(entry.value_mut().remove(pos));
                break;
            }
        }
        self.entries.retain(|_, records| !records.is_empty());
        removed
    }

    /// Drop bookings for `lab_id` whose start is within tolerance of `start`
    pub fn confirm(&self, lab_id: LabId, start: i64) -> usize {
        let tolerance = self.tolerance.as_secs();
        self.remove_where(lab_id, |r| r.start.abs_diff(start) <= tolerance)
    }

    /// Drop bookings older than the TTL
    pub fn expire(&self) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.entries.retain(|_, records| {
            let before = records.len();
            records.retain(|r| !r.is_expired(ttl));
            removed += before - records.len();
            !records.is_empty()
        });
        if removed > 0 {
            debug!(removed, "Expired optimistic bookings");
        }
        removed
    }

    /// Drop bookings that `confirmed` has superseded
    pub fn reconcile(&self, confirmed: &[Booking]) -> usize {
        let mut removed = 0;
        for booking in confirmed.iter().filter(|b| !b.is_optimistic) {
            if let Some(start) = booking.start {
                removed += self.confirm(booking.lab_id, start);
            }
        }
        removed
    }

    /// Live bookings visible to `subject`: its own, or any for the lab it names
    pub fn for_subject(&self, subject: &Subject) -> Vec<OptimisticRecord> {
        let scope = subject.cache_scope();
        let mut records: Vec<OptimisticRecord> = self
            .entries
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|r| !r.is_expired(self.ttl))
            .filter(|r| match subject {
                Subject::Lab { lab_id, .. } => r.lab_id == *lab_id,
                _ => r.scope == scope,
            })
            .collect();
        records.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_where(&self, lab_id: LabId, pred: impl Fn(&OptimisticRecord) -> bool) -> usize {
        let mut removed = 0;
        if let Some(mut records) = self.entries.get_mut(&lab_id) {
            let before = records.len();
            records.retain(|r| !pred(r));
            removed = before - records.len();
        }
        self.entries.remove_if(&lab_id, |_, records| records.is_empty());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Reservation, ReservationKey, StatusCategory};

    const NOW: i64 = 1_700_000_000;
    const WALLET: &str = "0x00000000000000000000000000000000000000aa";
    const TOLERANCE: Duration = Duration::from_secs(60);

    fn key(n: u8) -> ReservationKey {
        ReservationKey::parse(&format!("0x{}", hex::encode([n; 32]))).unwrap()
    }

    fn confirmed(n: u8, lab_id: LabId, start: i64) -> Booking {
        let reservation =
            Reservation::new(key(n), lab_id, RawStatus::Confirmed).with_window(start, start + 3600);
        Booking::confirmed(reservation, StatusCategory::Upcoming, None)
    }

    fn store() -> OptimisticStore {
        OptimisticStore::new(TOLERANCE, Duration::from_secs(600))
    }

    #[test]
    fn test_confirmed_read_back_replaces_optimistic() {
        let subject = Subject::wallet(WALLET);
        let optimistic = OptimisticRecord::new(&subject, 7, NOW + 3600, None).to_booking(NOW, None);

        let merged = merge_optimistic(
            vec![confirmed(1, 7, NOW + 3600 + 30)],
            vec![optimistic],
            TOLERANCE,
        );

        assert_eq!(merged.len(), 1);
        assert!(!merged[0].is_optimistic);
    }

    #[test]
    fn test_optimistic_outside_tolerance_survives() {
        let subject = Subject::wallet(WALLET);
        let far = OptimisticRecord::new(&subject, 7, NOW + 7200, None).to_booking(NOW, None);
        let other_lab = OptimisticRecord::new(&subject, 8, NOW + 3600, None).to_booking(NOW, None);

        let merged = merge_optimistic(
            vec![confirmed(1, 7, NOW + 3600)],
            vec![far, other_lab],
            TOLERANCE,
        );

        assert_eq!(merged.len(), 3);
        assert!(!merged[0].is_optimistic);
        assert!(merged[1..].iter().all(|b| b.is_optimistic));
    }

    #[test]
    fn test_optimistic_booking_shape() {
        let subject = Subject::wallet(WALLET);
        let booking = OptimisticRecord::new(&subject, 3, NOW + 60, Some(NOW + 120)).to_booking(NOW, None);
        assert!(booking.is_optimistic);
        assert!(booking.key.is_none());
        assert_eq!(booking.category, StatusCategory::Pending);
        assert_eq!(booking.lab_name, "Lab 3");
        assert_eq!(booking.renter.as_deref(), Some(WALLET));
    }

    #[test]
    fn test_store_confirm_and_remove() {
        let store = store();
        let subject = Subject::wallet(WALLET);
        let a = store.insert(OptimisticRecord::new(&subject, 7, NOW, None));
        store.insert(OptimisticRecord::new(&subject, 7, NOW + 10_000, None));
        store.insert(OptimisticRecord::new(&subject, 8, NOW, None));

        assert_eq!(store.confirm(7, NOW + 45), 1);
        assert!(store.remove(a).is_none());
        assert_eq!(store.len(), 2);

        let id = store.for_subject(&subject)[0].id;
        assert!(store.remove(id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_expiry() {
        let store = OptimisticStore::new(TOLERANCE, Duration::ZERO);
        store.insert(OptimisticRecord::new(&Subject::wallet(WALLET), 7, NOW, None));
        assert!(store.for_subject(&Subject::wallet(WALLET)).is_empty());
        assert_eq!(store.expire(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_reconcile_uses_confirmed_only() {
        let store = store();
        let subject = Subject::wallet(WALLET);
        store.insert(OptimisticRecord::new(&subject, 7, NOW, None));
        store.insert(OptimisticRecord::new(&subject, 9, NOW, None));

        assert_eq!(store.reconcile(&[confirmed(1, 7, NOW - 20)]), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_for_subject_scoping() {
        let store = store();
        let me = Subject::wallet(WALLET);
        let someone = Subject::institution("sess");
        store.insert(OptimisticRecord::new(&me, 7, NOW, None));
        store.insert(OptimisticRecord::new(&someone, 7, NOW + 100, None));

        assert_eq!(store.for_subject(&me).len(), 1);
        assert_eq!(
            store
                .for_subject(&Subject::lab(7, crate::types::IdentityMode::Wallet))
                .len(),
            2
        );
    }
}
