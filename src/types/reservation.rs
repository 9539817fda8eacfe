//! Reservation records and their lifecycle vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::BackendError;
use super::subject::{is_zero_address, LabId};

/// Opaque reservation identifier: `0x` + 64 hex digits, lower-cased
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReservationKey(String);

impl ReservationKey {
    /// Number of hex digits after the `0x` prefix
    pub const HEX_LEN: usize = 64;

    pub fn parse(raw: &str) -> Result<Self, BackendError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if digits.len() != Self::HEX_LEN || hex::decode(digits).is_err() {
            return Err(BackendError::InvalidInput(format!(
                "reservation key must be {} hex digits: {}",
                Self::HEX_LEN,
                raw
            )));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..10]
    }
}

impl FromStr for ReservationKey {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReservationKey {
    type Error = BackendError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReservationKey> for String {
    fn from(key: ReservationKey) -> Self {
        key.0
    }
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status as stored by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawStatus {
    Pending,
    Confirmed,
    InUse,
    Completed,
    Collected,
    Cancelled,
    Unknown(i64),
}

impl RawStatus {
    /// Numeric status codes used by the reservation contract
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Pending,
            1 => Self::Confirmed,
            2 => Self::InUse,
            3 => Self::Completed,
            4 => Self::Collected,
            5 => Self::Cancelled,
            other => Self::Unknown(other),
        }
    }

    /// Case-insensitive status names; numeric strings are accepted too
    pub fn from_name(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        match normalized.as_str() {
            "pending" | "requested" => Self::Pending,
            "confirmed" | "booked" => Self::Confirmed,
            "inuse" | "used" => Self::InUse,
            "completed" => Self::Completed,
            "collected" => Self::Collected,
            "cancelled" | "canceled" => Self::Cancelled,
            other => other
                .parse::<i64>()
                .map(Self::from_code)
                .unwrap_or(Self::Unknown(-1)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Derived lifecycle category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Pending,
    Upcoming,
    Active,
    Completed,
    Cancelled,
    Unknown,
}

impl StatusCategory {
    pub const ALL: [StatusCategory; 6] = [
        Self::Pending,
        Self::Upcoming,
        Self::Active,
        Self::Completed,
        Self::Cancelled,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One confirmed reservation as returned by either read path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub key: ReservationKey,
    pub lab_id: LabId,
    pub status: RawStatus,
    /// Start time (unix seconds)
    pub start: Option<i64>,
    /// End time (unix seconds)
    pub end: Option<i64>,
    /// Renter (owner) of the reservation
    pub renter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    /// Institutional provider routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Institutional user code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puc: Option<String>,
}

impl Reservation {
    /// Minimal reservation; the remaining fields default to empty
    pub fn new(key: ReservationKey, lab_id: LabId, status: RawStatus) -> Self {
        Self {
            key,
            lab_id,
            status,
            start: None,
            end: None,
            renter: None,
            price: None,
            provider: None,
            puc: None,
        }
    }

    pub fn with_window(mut self, start: i64, end: i64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_renter(mut self, renter: impl Into<String>) -> Self {
        self.renter = Some(renter.into());
        self
    }

    /// A reservation owned by the null identity does not exist
    pub fn has_owner(&self) -> bool {
        !is_zero_address(self.renter.as_deref())
    }
}

/// Answer to a record lookup; `NotFound` is a valid negative result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum RecordLookup {
    Found(Reservation),
    NotFound,
}

impl RecordLookup {
    /// The reservation, if it exists and has a real owner
    pub fn into_existing(self) -> Option<Reservation> {
        match self {
            Self::Found(reservation) if reservation.has_owner() => Some(reservation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> ReservationKey {
        ReservationKey::parse(&format!("0x{}", hex::encode([n; 32]))).unwrap()
    }

    #[test]
    fn test_key_normalization() {
        let upper = format!("0x{}", "AB".repeat(32));
        let parsed = ReservationKey::parse(&upper).unwrap();
        assert_eq!(parsed.as_str(), format!("0x{}", "ab".repeat(32)));

        let bare = ReservationKey::parse(&"ab".repeat(32)).unwrap();
        assert_eq!(parsed, bare);
        assert_eq!(parsed.short(), "0xabababab");
    }

    #[test]
    fn test_key_rejects_wrong_length() {
        assert!(ReservationKey::parse("0x1234").is_err());
        assert!(ReservationKey::parse(&format!("0x{}", "g".repeat(64))).is_err());
    }

    #[test]
    fn test_key_serde_roundtrip_validates() {
        let json = serde_json::to_string(&key(1)).unwrap();
        let back: ReservationKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key(1));
        assert!(serde_json::from_str::<ReservationKey>("\"0x12\"").is_err());
    }

    #[test]
    fn test_status_codes_and_names() {
        assert_eq!(RawStatus::from_code(0), RawStatus::Pending);
        assert_eq!(RawStatus::from_code(5), RawStatus::Cancelled);
        assert_eq!(RawStatus::from_code(42), RawStatus::Unknown(42));
        assert_eq!(RawStatus::from_name("BOOKED"), RawStatus::Confirmed);
        assert_eq!(RawStatus::from_name("in_use"), RawStatus::InUse);
        assert_eq!(RawStatus::from_name("canceled"), RawStatus::Cancelled);
        assert_eq!(RawStatus::from_name("4"), RawStatus::Collected);
        assert_eq!(RawStatus::from_name("mystery"), RawStatus::Unknown(-1));
    }

    #[test]
    fn test_lookup_excludes_null_owner() {
        let owned = Reservation::new(key(1), 7, RawStatus::Confirmed)
            .with_renter("0x00000000000000000000000000000000000a11ce");
        assert!(RecordLookup::Found(owned).into_existing().is_some());

        let orphan = Reservation::new(key(2), 7, RawStatus::Confirmed)
            .with_renter("0x0000000000000000000000000000000000000000");
        assert!(RecordLookup::Found(orphan).into_existing().is_none());
        assert!(RecordLookup::NotFound.into_existing().is_none());
    }
}
