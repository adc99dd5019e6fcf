//! Dispute workflow on top of the state machine
//!
//! Manages the OPEN -> UNDER_REVIEW -> RESOLVED -> CLOSED sub-lifecycle of a
//! dispute while keeping the parent record's top-level status in sync. Window
//! checks delegate to the time gate; status changes delegate to the state
//! machine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EscrowError;
use crate::models::{
    Dispute, DisputeReason, DisputeResolution, DisputeStatus, EscrowRecord, Evidence, Trigger,
};
use crate::{state_machine, time_gate, EscrowResult};

/// Maximum length of a dispute description
const MAX_DESCRIPTION_LEN: usize = 1000;

/// Dispute creation request
#[derive(Debug, Clone)]
pub struct OpenDisputeRequest {
    pub raised_by: String,
    pub reason: DisputeReason,
    pub description: String,
    pub evidence: Vec<Evidence>,
}

/// Dispute resolution request
#[derive(Debug, Clone)]
pub struct ResolveDisputeRequest {
    pub dispute_id: Uuid,
    pub resolution: DisputeResolution,
    pub admin_notes: Option<String>,
    pub resolved_by: String,
}

/// Raise a dispute on a delivered record inside the dispute window.
/// Returns the id of the new dispute.
pub fn open(
    record: &mut EscrowRecord,
    request: OpenDisputeRequest,
    now: DateTime<Utc>,
) -> EscrowResult<Uuid> {
    state_machine::ensure_source(record, Trigger::OpenDispute)?;

    if request.raised_by.trim().is_empty() {
        return Err(EscrowError::validation("Dispute raiser cannot be empty"));
    }
    if request.description.trim().is_empty() {
        return Err(EscrowError::validation(
            "Dispute description cannot be empty",
        ));
    }
    if request.description.len() > MAX_DESCRIPTION_LEN {
        return Err(EscrowError::validation(format!(
            "Dispute description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }

    if !time_gate::can_be_disputed(record, now) {
        let delivered_at = record
            .delivered_at
            .ok_or_else(|| EscrowError::validation("Record has no delivery timestamp"))?;
        return Err(EscrowError::DisputeWindowExpired {
            delivered_at,
            dispute_period_days: record.dispute_period_days,
        });
    }

    if let Some(existing) = record.unresolved_dispute() {
        return Err(EscrowError::DisputeAlreadyOpen {
            dispute_id: existing.id,
        });
    }

    let dispute = Dispute::new(
        request.raised_by.clone(),
        request.reason,
        request.description,
        request.evidence,
        now,
    );
    let dispute_id = dispute.id;
    record.disputes.push(dispute);

    let reason = format!("Dispute opened: {}", request.reason);
    state_machine::mark_disputed(record, Some(&request.raised_by), &reason, now)?;

    Ok(dispute_id)
}

/// Move an open dispute under operator review
pub fn begin_review(
    record: &mut EscrowRecord,
    dispute_id: Uuid,
    reviewer: &str,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    let dispute = record
        .dispute_mut(dispute_id)
        .ok_or(EscrowError::DisputeNotFound { dispute_id })?;

    match dispute.status {
        DisputeStatus::Open => {
            dispute.status = DisputeStatus::UnderReview;
            dispute.admin_notes = Some(format!("Under review by {reviewer}"));
            record.updated_at = now;
            Ok(())
        }
        DisputeStatus::UnderReview => Err(EscrowError::validation(format!(
            "Dispute {dispute_id} is already under review"
        ))),
        DisputeStatus::Resolved | DisputeStatus::Closed => {
            Err(EscrowError::DisputeAlreadySettled { dispute_id })
        }
    }
}

/// Record a resolution and drive the parent record to its outcome.
///
/// `RELEASE_TO_SELLER` and `REFUND_TO_BUYER` settle the record immediately.
/// `PARTIAL_REFUND` and `OTHER` are recorded decisions only: the record stays
/// `DISPUTED` until an operator issues the explicit follow-up release or
/// refund.
pub fn resolve(
    record: &mut EscrowRecord,
    request: ResolveDisputeRequest,
    now: DateTime<Utc>,
) -> EscrowResult<()> {
    state_machine::ensure_source(record, Trigger::ResolveDispute)?;

    {
        let dispute = record
            .dispute_mut(request.dispute_id)
            .ok_or(EscrowError::DisputeNotFound {
                dispute_id: request.dispute_id,
            })?;
        if dispute.status.is_settled() {
            return Err(EscrowError::DisputeAlreadySettled {
                dispute_id: request.dispute_id,
            });
        }
        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = Some(request.resolution);
        dispute.admin_notes = request.admin_notes.clone();
        dispute.resolved_by = Some(request.resolved_by.clone());
        dispute.resolved_at = Some(now);
    }

    match request.resolution {
        DisputeResolution::ReleaseToSeller => state_machine::release(
            record,
            Some(&request.resolved_by),
            "Dispute resolved: funds released to seller",
            now,
        ),
        DisputeResolution::RefundToBuyer => state_machine::refund(
            record,
            Some(&request.resolved_by),
            "Dispute resolved: funds returned to buyer",
            now,
        ),
        DisputeResolution::PartialRefund | DisputeResolution::Other => {
            record.updated_at = now;
            Ok(())
        }
    }
}

/// Archive a resolved dispute
pub fn close(record: &mut EscrowRecord, dispute_id: Uuid, now: DateTime<Utc>) -> EscrowResult<()> {
    let dispute = record
        .dispute_mut(dispute_id)
        .ok_or(EscrowError::DisputeNotFound { dispute_id })?;

    match dispute.status {
        DisputeStatus::Resolved => {
            dispute.status = DisputeStatus::Closed;
            record.updated_at = now;
            Ok(())
        }
        DisputeStatus::Closed => Err(EscrowError::DisputeAlreadySettled { dispute_id }),
        DisputeStatus::Open | DisputeStatus::UnderReview => Err(EscrowError::validation(format!(
            "Dispute {dispute_id} must be resolved before closing"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Currency, DeliveryInfo, EscrowStatus, PaymentDetails, PaymentMethod,
    };
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn delivered_record() -> (EscrowRecord, DateTime<Utc>) {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut record = EscrowRecord::new(
            Uuid::new_v4(),
            "buyer-1".to_string(),
            "seller-1".to_string(),
            Decimal::from(100),
            Decimal::from(5),
            Currency::Brl,
            PaymentDetails::new(PaymentMethod::Pix),
            t0,
        );
        state_machine::fund(&mut record, None, t0 + Duration::hours(1)).unwrap();
        state_machine::deliver(
            &mut record,
            DeliveryInfo::default(),
            None,
            t0 + Duration::days(1),
        )
        .unwrap();
        let delivered_at = record.delivered_at.unwrap();
        (record, delivered_at)
    }

    fn open_request() -> OpenDisputeRequest {
        OpenDisputeRequest {
            raised_by: "buyer-1".to_string(),
            reason: DisputeReason::DamagedItem,
            description: "Screen cracked on arrival".to_string(),
            evidence: vec![Evidence {
                url: "https://cdn.example/photo1.jpg".to_string(),
                description: Some("photo of the damage".to_string()),
            }],
        }
    }

    #[test]
    fn open_succeeds_at_the_exact_window_boundary() {
        let (mut record, delivered_at) = delivered_record();
        let boundary = delivered_at + Duration::days(3);

        let dispute_id = open(&mut record, open_request(), boundary).unwrap();

        assert_eq!(record.status, EscrowStatus::Disputed);
        let dispute = record.dispute(dispute_id).unwrap();
        assert_eq!(dispute.status, DisputeStatus::Open);
        assert_eq!(
            record.status_history.last().unwrap().reason,
            "Dispute opened: DAMAGED_ITEM"
        );
    }

    #[test]
    fn open_after_the_window_is_rejected() {
        let (mut record, delivered_at) = delivered_record();
        let late = delivered_at + Duration::days(3) + Duration::seconds(1);

        let err = open(&mut record, open_request(), late).unwrap_err();
        assert!(matches!(err, EscrowError::DisputeWindowExpired { .. }));
        assert_eq!(record.status, EscrowStatus::Delivered);
        assert!(record.disputes.is_empty());
    }

    #[test]
    fn only_one_unresolved_dispute_at_a_time() {
        let (mut record, delivered_at) = delivered_record();
        let now = delivered_at + Duration::days(1);

        let first = open(&mut record, open_request(), now).unwrap();
        let err = open(&mut record, open_request(), now).unwrap_err();
        match err {
            EscrowError::DisputeAlreadyOpen { dispute_id } => assert_eq!(dispute_id, first),
            // open from DISPUTED already fails the source check
            EscrowError::InvalidTransition { .. } => {}
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn resolve_refund_drives_parent_to_refunded() {
        let (mut record, delivered_at) = delivered_record();
        let now = delivered_at + Duration::days(1);
        let dispute_id = open(&mut record, open_request(), now).unwrap();

        resolve(
            &mut record,
            ResolveDisputeRequest {
                dispute_id,
                resolution: DisputeResolution::RefundToBuyer,
                admin_notes: Some("seller accepted fault".to_string()),
                resolved_by: "operator-1".to_string(),
            },
            now + Duration::days(1),
        )
        .unwrap();

        assert_eq!(record.status, EscrowStatus::Refunded);
        assert!(record.refunded_at.is_some());
        let dispute = record.dispute(dispute_id).unwrap();
        assert_eq!(dispute.status, DisputeStatus::Resolved);
        assert_eq!(dispute.resolved_by.as_deref(), Some("operator-1"));
        assert!(dispute.resolved_at.is_some());
    }

    #[test]
    fn resolve_unknown_dispute_fails() {
        let (mut record, delivered_at) = delivered_record();
        let now = delivered_at + Duration::days(1);
        open(&mut record, open_request(), now).unwrap();

        let err = resolve(
            &mut record,
            ResolveDisputeRequest {
                dispute_id: Uuid::new_v4(),
                resolution: DisputeResolution::RefundToBuyer,
                admin_notes: None,
                resolved_by: "operator-1".to_string(),
            },
            now,
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::DisputeNotFound { .. }));
        assert_eq!(record.status, EscrowStatus::Disputed);
    }

    #[test]
    fn partial_refund_waits_for_explicit_follow_up() {
        let (mut record, delivered_at) = delivered_record();
        let now = delivered_at + Duration::days(1);
        let dispute_id = open(&mut record, open_request(), now).unwrap();

        resolve(
            &mut record,
            ResolveDisputeRequest {
                dispute_id,
                resolution: DisputeResolution::PartialRefund,
                admin_notes: Some("split 60/40".to_string()),
                resolved_by: "operator-1".to_string(),
            },
            now,
        )
        .unwrap();

        // decision recorded, no fund movement yet
        assert_eq!(record.status, EscrowStatus::Disputed);
        assert_eq!(
            record.dispute(dispute_id).unwrap().status,
            DisputeStatus::Resolved
        );

        state_machine::refund(
            &mut record,
            Some("operator-1"),
            "Partial refund executed through gateway",
            now + Duration::hours(1),
        )
        .unwrap();
        assert_eq!(record.status, EscrowStatus::Refunded);
    }

    #[test]
    fn review_and_close_lifecycle() {
        let (mut record, delivered_at) = delivered_record();
        let now = delivered_at + Duration::days(1);
        let dispute_id = open(&mut record, open_request(), now).unwrap();

        begin_review(&mut record, dispute_id, "operator-1", now).unwrap();
        assert_eq!(
            record.dispute(dispute_id).unwrap().status,
            DisputeStatus::UnderReview
        );
        assert!(begin_review(&mut record, dispute_id, "operator-2", now).is_err());

        // cannot archive before a decision
        assert!(close(&mut record, dispute_id, now).is_err());

        resolve(
            &mut record,
            ResolveDisputeRequest {
                dispute_id,
                resolution: DisputeResolution::ReleaseToSeller,
                admin_notes: None,
                resolved_by: "operator-1".to_string(),
            },
            now,
        )
        .unwrap();
        assert_eq!(record.status, EscrowStatus::Released);

        close(&mut record, dispute_id, now).unwrap();
        assert_eq!(
            record.dispute(dispute_id).unwrap().status,
            DisputeStatus::Closed
        );
        let err = close(&mut record, dispute_id, now).unwrap_err();
        assert!(matches!(err, EscrowError::DisputeAlreadySettled { .. }));
    }
}
