//! State machine for escrow transitions
//!
//! The sole authority over legal status changes. Every transition validates
//! the source state, mutates the terminal fields, appends exactly one audit
//! trail entry, and leaves the record untouched on rejection. Persistence and
//! locking live in the service layer; functions here operate on a record the
//! caller already owns.

use chrono::{DateTime, Utc};

use crate::error::EscrowError;
use crate::models::{
    DeliveryInfo, DisputeResolution, EscrowRecord, EscrowStatus, Trigger,
};
use crate::EscrowResult;

/// Legal source states per trigger
pub fn allowed_sources(trigger: Trigger) -> &'static [EscrowStatus] {
    use EscrowStatus::*;
    match trigger {
        Trigger::Fund => &[Pending],
        Trigger::MarkInTransit => &[Funded],
        Trigger::Deliver => &[Funded, InTransit],
        Trigger::Confirm => &[Delivered],
        Trigger::Release => &[Confirmed, Disputed],
        Trigger::Refund => &[Funded, Disputed],
        Trigger::Cancel => &[Pending, Funded],
        Trigger::OpenDispute => &[Delivered],
        Trigger::ResolveDispute => &[Disputed],
        Trigger::Expire => &[Pending],
    }
}

/// Reject the trigger unless the record sits in one of its legal sources
pub(crate) fn ensure_source(record: &EscrowRecord, trigger: Trigger) -> EscrowResult<()> {
    let allowed = allowed_sources(trigger);
    if allowed.contains(&record.status) {
        Ok(())
    } else {
        Err(EscrowError::invalid_transition(
            record.status,
            trigger,
            allowed,
        ))
    }
}

/// From `Disputed`, `release`/`refund` are legal only once the latest dispute
/// carries a qualifying recorded resolution.
fn dispute_outcome_allows(record: &EscrowRecord, trigger: Trigger) -> bool {
    let Some(dispute) = record.latest_dispute() else {
        return false;
    };
    if !dispute.status.is_settled() {
        return false;
    }
    match (trigger, dispute.resolution) {
        (Trigger::Release, Some(DisputeResolution::ReleaseToSeller)) => true,
        (Trigger::Refund, Some(DisputeResolution::RefundToBuyer)) => true,
        // Partial and other resolutions are recorded decisions whose terminal
        // outcome is picked by an explicit operator follow-up.
        (_, Some(DisputeResolution::PartialRefund)) => true,
        (_, Some(DisputeResolution::Other)) => true,
        _ => false,
    }
}

fn ensure_settlement_source(record: &EscrowRecord, trigger: Trigger) -> EscrowResult<()> {
    ensure_source(record, trigger)?;
    if record.status == EscrowStatus::Disputed && !dispute_outcome_allows(record, trigger) {
        return Err(EscrowError::invalid_transition(
            record.status,
            trigger,
            allowed_sources(trigger),
        ));
    }
    Ok(())
}

fn commit(
    record: &mut EscrowRecord,
    status: EscrowStatus,
    changed_by: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) {
    record.status = status;
    record.updated_at = now;
    record.record_status(status, changed_by, reason, None, now);
    record.recompute_total();
}

/// `PENDING -> FUNDED`; the external gateway has captured the deposit
pub fn fund(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_source(record, Trigger::Fund)?;
    record.funded_at = Some(now);
    commit(
        record,
        EscrowStatus::Funded,
        changed_by,
        "Funds deposited into custody",
        now,
    );
    Ok(())
}

/// `FUNDED -> IN_TRANSIT`
pub fn mark_in_transit(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_source(record, Trigger::MarkInTransit)?;
    commit(
        record,
        EscrowStatus::InTransit,
        changed_by,
        "Item handed to carrier",
        now,
    );
    Ok(())
}

/// `FUNDED | IN_TRANSIT -> DELIVERED`; stores the supplied delivery metadata,
/// preserving any previously captured field the update leaves unset
pub fn deliver(
    record: &mut EscrowRecord,
    update: DeliveryInfo,
    changed_by: Option<&str>,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_source(record, Trigger::Deliver)?;

    let info = record.delivery_info.get_or_insert_with(DeliveryInfo::default);
    if update.tracking_code.is_some() {
        info.tracking_code = update.tracking_code;
    }
    if update.carrier.is_some() {
        info.carrier = update.carrier;
    }
    if update.estimated_delivery.is_some() {
        info.estimated_delivery = update.estimated_delivery;
    }
    if update.actual_delivery.is_some() {
        info.actual_delivery = update.actual_delivery;
    }
    if update.address.is_some() {
        info.address = update.address;
    }

    record.delivered_at = Some(now);
    commit(
        record,
        EscrowStatus::Delivered,
        changed_by,
        "Item delivered to buyer",
        now,
    );
    Ok(())
}

/// `DELIVERED -> CONFIRMED`
pub fn confirm(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_source(record, Trigger::Confirm)?;
    record.confirmed_at = Some(now);
    commit(
        record,
        EscrowStatus::Confirmed,
        changed_by,
        "Delivery confirmed by buyer",
        now,
    );
    Ok(())
}

/// `CONFIRMED | DISPUTED(qualifying resolution) -> RELEASED`
pub fn release(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_settlement_source(record, Trigger::Release)?;
    record.released_at = Some(now);
    commit(record, EscrowStatus::Released, changed_by, reason, now);
    Ok(())
}

/// `FUNDED | DISPUTED(qualifying resolution) -> REFUNDED`
pub fn refund(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_settlement_source(record, Trigger::Refund)?;
    record.refunded_at = Some(now);
    commit(record, EscrowStatus::Refunded, changed_by, reason, now);
    Ok(())
}

/// `PENDING | FUNDED -> CANCELLED`
pub fn cancel(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_source(record, Trigger::Cancel)?;
    record.cancelled_at = Some(now);
    commit(record, EscrowStatus::Cancelled, changed_by, reason, now);
    Ok(())
}

/// `PENDING -> EXPIRED`; the funding authorization lapsed upstream
pub fn expire(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_source(record, Trigger::Expire)?;
    record.expired_at = Some(now);
    commit(
        record,
        EscrowStatus::Expired,
        changed_by,
        "Funding window lapsed without deposit",
        now,
    );
    Ok(())
}

/// `DELIVERED -> DISPUTED`; the dispute entity itself is appended by the
/// dispute manager before calling this
pub(crate) fn mark_disputed(
    record: &mut EscrowRecord,
    changed_by: Option<&str>,
    reason: &str,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    ensure_source(record, Trigger::OpenDispute)?;
    commit(record, EscrowStatus::Disputed, changed_by, reason, now);
    Ok(())
}
