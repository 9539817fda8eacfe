//! Composed booking rows handed to consumers

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use super::lab::LabDetails;
use super::reservation::{RawStatus, Reservation, ReservationKey, StatusCategory};
use super::subject::LabId;

/// A classified, enriched reservation; confirmed or optimistic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Confirmed key; `None` for optimistic bookings
    pub key: Option<ReservationKey>,
    /// Local id of an optimistic booking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic_id: Option<Uuid>,
    pub lab_id: LabId,
    pub status: RawStatus,
    pub category: StatusCategory,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub renter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puc: Option<String>,
    pub lab_name: String,
    /// Joined lab data; absent when details were not requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab: Option<LabDetails>,
    pub is_optimistic: bool,
}

impl Booking {
    /// Build from a confirmed reservation
    pub fn confirmed(
        reservation: Reservation,
        category: StatusCategory,
        lab: Option<LabDetails>,
    ) -> Self {
        let lab_name = lab
            .as_ref()
            .map(|l| l.name.clone())
            .unwrap_or_else(|| LabDetails::fallback_name(reservation.lab_id));
        Self {
            key: Some(reservation.key),
            optimistic_id: None,
            lab_id: reservation.lab_id,
            status: reservation.status,
            category,
            start: reservation.start,
            end: reservation.end,
            renter: reservation.renter,
            price: reservation.price,
            provider: reservation.provider,
            puc: reservation.puc,
            lab_name,
            lab,
            is_optimistic: false,
        }
    }

    /// Deterministic tie-break: keyed bookings by key, then optimistic ones by local id
    pub fn tie_break(&self, other: &Self) -> Ordering {
        match (&self.key, &other.key) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.optimistic_id.cmp(&other.optimistic_id),
        }
    }
}
