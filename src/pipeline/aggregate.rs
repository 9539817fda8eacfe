//! Summary counts and recent activity

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{Booking, StatusCategory};

/// Bookings per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub pending: usize,
    pub upcoming: usize,
    pub active: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub unknown: usize,
    pub total: usize,
}

impl Summary {
    pub fn from_bookings(bookings: &[Booking]) -> Self {
        let mut summary = Self::default();
        for booking in bookings {
            *summary.slot(booking.category) += 1;
            summary.total += 1;
        }
        summary
    }

    pub fn get(&self, category: StatusCategory) -> usize {
        match category {
            StatusCategory::Pending => self.pending,
            StatusCategory::Upcoming => self.upcoming,
            StatusCategory::Active => self.active,
            StatusCategory::Completed => self.completed,
            StatusCategory::Cancelled => self.cancelled,
            StatusCategory::Unknown => self.unknown,
        }
    }

    fn slot(&mut self, category: StatusCategory) -> &mut usize {
        match category {
            StatusCategory::Pending => &mut self.pending,
            StatusCategory::Upcoming => &mut self.upcoming,
            StatusCategory::Active => &mut self.active,
            StatusCategory::Completed => &mut self.completed,
            StatusCategory::Cancelled => &mut self.cancelled,
            StatusCategory::Unknown => &mut self.unknown,
        }
    }
}

/// Up to `limit` bookings that started within `window` before `now`,
/// newest first. Bookings without a start are skipped.
pub fn recent_activity(
    bookings: &[Booking],
    now: i64,
    window: Duration,
    limit: usize,
) -> Vec<Booking> {
    let earliest = now.saturating_sub(window.as_secs() as i64);
    let mut recent: Vec<&Booking> = bookings
        .iter()
        .filter(|b| matches!(b.start, Some(start) if start >= earliest && start <= now))
        .collect();

    recent.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| a.tie_break(b)));
    recent.into_iter().take(limit).cloned().collect()
}
