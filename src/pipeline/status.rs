//! Lifecycle classification

use crate::types::{RawStatus, StatusCategory};

/// Derive the display category of a reservation at `now` (unix seconds).
///
/// Rules apply in order: cancellation wins over everything, pending ignores
/// timing, terminal statuses are completed, and confirmed (or unknown)
/// reservations are placed by their time window. A confirmed reservation
/// without a start is upcoming; one that has started without an end is active.
pub fn classify(
    raw: RawStatus,
    now: i64,
    start: Option<i64>,
    end: Option<i64>,
) -> StatusCategory {
    match raw {
        RawStatus::Cancelled => StatusCategory::Cancelled,
        RawStatus::Pending => StatusCategory::Pending,
        RawStatus::InUse | RawStatus::Completed | RawStatus::Collected => {
            StatusCategory::Completed
        }
        RawStatus::Confirmed => by_window(now, start, end).unwrap_or(StatusCategory::Upcoming),
        RawStatus::Unknown(_) => by_window(now, start, end).unwrap_or(StatusCategory::Unknown),
    }
}

fn by_window(now: i64, start: Option<i64>, end: Option<i64>) -> Option<StatusCategory> {
    let start = start?;
    Some(match end {
        _ if now < start => StatusCategory::Upcoming,
        Some(end) if now > end => StatusCategory::Completed,
        _ => StatusCategory::Active,
    })
}
