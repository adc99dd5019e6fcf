//! Time-gate predicates for auto-release and dispute eligibility
//!
//! Pure, side-effect-free functions over a record and an explicit `now`.
//! Nothing here is ever persisted; callers recompute on every read so a
//! cached eligibility flag can never go stale.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EscrowRecord, EscrowStatus};

/// True iff the record is confirmed and the auto-release window has elapsed
pub fn can_auto_release(record: &EscrowRecord, now: DateTime<Utc>) -> bool {
    if record.status != EscrowStatus::Confirmed {
        return false;
    }
    match record.confirmed_at {
        Some(confirmed_at) => now - confirmed_at >= Duration::days(record.auto_release_days as i64),
        None => false,
    }
}

/// True iff the record is delivered and the dispute window is still open.
/// The window is inclusive of the exact boundary instant: a dispute raised
/// at precisely `dispute_period_days` after delivery is still valid.
pub fn can_be_disputed(record: &EscrowRecord, now: DateTime<Utc>) -> bool {
    if record.status != EscrowStatus::Delivered {
        return false;
    }
    match record.delivered_at {
        Some(delivered_at) => {
            now - delivered_at <= Duration::days(record.dispute_period_days as i64)
        }
        None => false,
    }
}

/// Remaining time until auto-release, clamped at zero; `None` unless confirmed
pub fn time_to_auto_release(record: &EscrowRecord, now: DateTime<Utc>) -> Option<Duration> {
    if record.status != EscrowStatus::Confirmed {
        return None;
    }
    let confirmed_at = record.confirmed_at?;
    let remaining = Duration::days(record.auto_release_days as i64) - (now - confirmed_at);
    Some(remaining.max(Duration::zero()))
}

/// Remaining time in the dispute window, clamped at zero; `None` unless delivered
pub fn time_to_dispute(record: &EscrowRecord, now: DateTime<Utc>) -> Option<Duration> {
    if record.status != EscrowStatus::Delivered {
        return None;
    }
    let delivered_at = record.delivered_at?;
    let remaining = Duration::days(record.dispute_period_days as i64) - (now - delivered_at);
    Some(remaining.max(Duration::zero()))
}

/// Snapshot of the time-gate predicates for display purposes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eligibility {
    pub can_auto_release: bool,
    pub can_be_disputed: bool,
    /// Remaining days until auto-release, fractional; `None` unless confirmed
    pub days_to_auto_release: Option<f64>,
    /// Remaining days in the dispute window, fractional; `None` unless delivered
    pub days_to_dispute: Option<f64>,
}

/// Compute all predicates at once
pub fn eligibility(record: &EscrowRecord, now: DateTime<Utc>) -> Eligibility {
    Eligibility {
        can_auto_release: can_auto_release(record, now),
        can_be_disputed: can_be_disputed(record, now),
        days_to_auto_release: time_to_auto_release(record, now).map(as_days),
        days_to_dispute: time_to_dispute(record, now).map(as_days),
    }
}

fn as_days(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / 86_400.0
}
