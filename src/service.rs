//! Escrow service facade
//!
//! The only entry point external collaborators call. Wraps the state machine
//! and dispute manager with persistence, per-record optimistic concurrency,
//! and fire-and-forget notification dispatch. Every mutating method takes an
//! explicit `now` so the whole surface is testable with injected time.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispute_manager::{self, OpenDisputeRequest, ResolveDisputeRequest};
use crate::error::EscrowError;
use crate::models::{
    Currency, DeliveryInfo, EscrowRecord, EscrowStatus, NotificationPrefs, PaymentDetails,
    RecordMetadata, AUTO_RELEASE_DAYS_MAX, AUTO_RELEASE_DAYS_MIN, DISPUTE_PERIOD_DAYS_MAX,
    DISPUTE_PERIOD_DAYS_MIN,
};
use crate::notifier::EscrowNotifier;
use crate::state_machine;
use crate::store::EscrowStore;
use crate::time_gate::{self, Eligibility};
use crate::EscrowResult;

/// Configuration for the escrow service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowServiceConfig {
    /// Smallest amount accepted at creation
    pub min_amount: Decimal,
    /// Largest amount accepted at creation
    pub max_amount: Decimal,
    /// Bounded retry count for lost conditional updates
    pub max_update_retries: u32,
    /// Open disputes older than this many days show up in the review queue
    pub dispute_review_cutoff_days: u32,
}

impl Default for EscrowServiceConfig {
    fn default() -> Self {
        Self {
            min_amount: Decimal::from(10),
            max_amount: Decimal::from(100_000),
            max_update_retries: 3,
            dispute_review_cutoff_days: 3,
        }
    }
}

/// Escrow creation request
#[derive(Debug, Clone)]
pub struct CreateEscrowRequest {
    pub transaction_id: Uuid,
    pub payer_id: String,
    pub payee_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: Currency,
    pub payment_details: PaymentDetails,
    pub auto_release_days: Option<u32>,
    pub dispute_period_days: Option<u32>,
    pub notifications: Option<NotificationPrefs>,
    pub metadata: Option<RecordMetadata>,
}

/// Main escrow service
pub struct EscrowService {
    config: EscrowServiceConfig,
    store: Arc<dyn EscrowStore>,
    notifier: Arc<dyn EscrowNotifier>,
}

impl EscrowService {
    /// Create a new escrow service
    pub fn new(
        config: EscrowServiceConfig,
        store: Arc<dyn EscrowStore>,
        notifier: Arc<dyn EscrowNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
        }
    }

    /// Create a new escrow in `PENDING` for an authorized trade
    pub async fn create(
        &self,
        request: CreateEscrowRequest,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        self.validate_create(&request)?;

        let mut record = EscrowRecord::new(
            request.transaction_id,
            request.payer_id,
            request.payee_id,
            request.amount,
            request.fee,
            request.currency,
            request.payment_details,
            now,
        );
        if let Some(days) = request.auto_release_days {
            record.auto_release_days = days;
        }
        if let Some(days) = request.dispute_period_days {
            record.dispute_period_days = days;
        }
        if let Some(prefs) = request.notifications {
            record.notifications = prefs;
        }
        if let Some(metadata) = request.metadata {
            record.metadata = metadata;
        }

        let record = self.store.insert(record).await?;
        info!(escrow_id = %record.id, transaction_id = %record.transaction_id, "Created escrow");

        if let Some(change) = record.status_history.last() {
            self.notify(&record, change).await;
        }
        Ok(record)
    }

    /// Fetch one record by id
    pub async fn get(&self, id: Uuid) -> EscrowResult<EscrowRecord> {
        self.store.get(id).await
    }

    /// Fetch the escrow backing a trade transaction, if any
    pub async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> EscrowResult<Option<EscrowRecord>> {
        self.store.find_by_transaction(transaction_id).await
    }

    /// Records where the party appears as payer or payee, newest first
    pub async fn list_by_party(
        &self,
        party_id: &str,
        status: Option<EscrowStatus>,
    ) -> EscrowResult<Vec<EscrowRecord>> {
        self.store.list_by_party(party_id, status).await
    }

    /// Time-gate predicates for display purposes
    pub async fn eligibility(&self, id: Uuid, now: DateTime<Utc>) -> EscrowResult<Eligibility> {
        let record = self.store.get(id).await?;
        Ok(time_gate::eligibility(&record, now))
    }

    /// The external gateway captured the deposit
    pub async fn fund(
        &self,
        id: Uuid,
        changed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        info!(escrow_id = %id, "Funding escrow");
        self.apply(id, |record| state_machine::fund(record, changed_by, now))
            .await
    }

    /// The seller handed the item to the carrier
    pub async fn mark_in_transit(
        &self,
        id: Uuid,
        changed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        self.apply(id, |record| {
            state_machine::mark_in_transit(record, changed_by, now)
        })
        .await
    }

    /// The fulfillment collaborator reported delivery
    pub async fn deliver(
        &self,
        id: Uuid,
        update: DeliveryInfo,
        changed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        info!(escrow_id = %id, "Recording delivery");
        self.apply(id, |record| {
            state_machine::deliver(record, update.clone(), changed_by, now)
        })
        .await
    }

    /// The buyer confirmed delivery
    pub async fn confirm(
        &self,
        id: Uuid,
        changed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        self.apply(id, |record| state_machine::confirm(record, changed_by, now))
            .await
    }

    /// Release custody to the seller
    pub async fn release(
        &self,
        id: Uuid,
        changed_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        info!(escrow_id = %id, "Releasing escrow");
        self.apply(id, |record| {
            state_machine::release(record, changed_by, "Funds released to seller", now)
        })
        .await
    }

    /// Return custody to the buyer
    pub async fn refund(
        &self,
        id: Uuid,
        changed_by: Option<&str>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        info!(escrow_id = %id, "Refunding escrow");
        let reason = reason.unwrap_or("Funds returned to buyer");
        self.apply(id, |record| {
            state_machine::refund(record, changed_by, reason, now)
        })
        .await
    }

    /// Cancel before completion
    pub async fn cancel(
        &self,
        id: Uuid,
        changed_by: Option<&str>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        let reason = reason.unwrap_or("Transaction cancelled");
        self.apply(id, |record| {
            state_machine::cancel(record, changed_by, reason, now)
        })
        .await
    }

    /// The upstream funding authorization lapsed
    pub async fn expire(&self, id: Uuid, now: DateTime<Utc>) -> EscrowResult<EscrowRecord> {
        self.apply(id, |record| state_machine::expire(record, None, now))
            .await
    }

    /// Raise a dispute inside the window; returns the updated record and the
    /// new dispute id
    pub async fn open_dispute(
        &self,
        id: Uuid,
        request: OpenDisputeRequest,
        now: DateTime<Utc>,
    ) -> EscrowResult<(EscrowRecord, Uuid)> {
        info!(escrow_id = %id, reason = %request.reason, "Opening dispute");
        let updated = self
            .apply(id, |record| {
                dispute_manager::open(record, request.clone(), now).map(|_| ())
            })
            .await?;
        let dispute_id = updated
            .latest_dispute()
            .map(|d| d.id)
            .ok_or_else(|| EscrowError::store("Dispute missing after committed open"))?;
        Ok((updated, dispute_id))
    }

    /// Claim an open dispute for operator review
    pub async fn begin_dispute_review(
        &self,
        id: Uuid,
        dispute_id: Uuid,
        reviewer: &str,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        self.apply(id, |record| {
            dispute_manager::begin_review(record, dispute_id, reviewer, now)
        })
        .await
    }

    /// Record a dispute decision and drive the record to its outcome
    pub async fn resolve_dispute(
        &self,
        id: Uuid,
        request: ResolveDisputeRequest,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        info!(escrow_id = %id, dispute_id = %request.dispute_id, "Resolving dispute");
        self.apply(id, |record| {
            dispute_manager::resolve(record, request.clone(), now)
        })
        .await
    }

    /// Archive a resolved dispute
    pub async fn close_dispute(
        &self,
        id: Uuid,
        dispute_id: Uuid,
        now: DateTime<Utc>,
    ) -> EscrowResult<EscrowRecord> {
        self.apply(id, |record| dispute_manager::close(record, dispute_id, now))
            .await
    }

    /// Release a confirmed record whose auto-release window has elapsed.
    /// Used by the scheduler; callable directly for backfills.
    pub async fn auto_release(&self, id: Uuid, now: DateTime<Utc>) -> EscrowResult<EscrowRecord> {
        self.apply(id, |record| {
            if !time_gate::can_auto_release(record, now) {
                return Err(EscrowError::AutoReleaseNotEligible {
                    status: record.status,
                });
            }
            state_machine::release(
                record,
                None,
                "Automatic release: confirmation window elapsed",
                now,
            )
        })
        .await
    }

    /// Confirmed records whose auto-release window has elapsed
    pub async fn auto_release_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> EscrowResult<Vec<EscrowRecord>> {
        let confirmed = self.store.list_by_status(EscrowStatus::Confirmed).await?;
        Ok(confirmed
            .into_iter()
            .filter(|record| time_gate::can_auto_release(record, now))
            .collect())
    }

    /// Records whose open disputes have waited past the review cutoff
    pub async fn disputes_pending_review(
        &self,
        now: DateTime<Utc>,
    ) -> EscrowResult<Vec<EscrowRecord>> {
        let cutoff = now - Duration::days(self.config.dispute_review_cutoff_days as i64);
        self.store.list_with_open_disputes_before(cutoff).await
    }

    /// Load, mutate, conditionally write. A lost race re-reads the record and
    /// retries the whole operation against fresh state, bounded by
    /// `max_update_retries`; the state machine re-validates every time.
    async fn apply<F>(&self, id: Uuid, op: F) -> EscrowResult<EscrowRecord>
    where
        F: Fn(&mut EscrowRecord) -> EscrowResult<()>,
    {
        let mut attempts = 0;
        loop {
            let mut record = self.store.get(id).await?;
            let history_before = record.status_history.len();
            op(&mut record)?;
            let status_changed = record.status_history.len() > history_before;

            match self.store.update(record).await {
                Ok(updated) => {
                    if status_changed {
                        if let Some(change) = updated.status_history.last() {
                            self.notify(&updated, change).await;
                        }
                    }
                    return Ok(updated);
                }
                Err(err) if err.is_retryable() && attempts < self.config.max_update_retries => {
                    attempts += 1;
                    warn!(
                        escrow_id = %id,
                        attempt = attempts,
                        "Lost conditional update race, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fire-and-forget notification; failures are logged and never surface
    async fn notify(&self, record: &EscrowRecord, change: &crate::models::StatusChange) {
        if let Err(err) = self.notifier.status_changed(record, change).await {
            warn!(
                escrow_id = %record.id,
                status = %change.status,
                error = %err,
                "Notification failed, transition stands"
            );
        }
    }

    /// Validate an escrow creation request
    fn validate_create(&self, request: &CreateEscrowRequest) -> EscrowResult<()> {
        if request.amount <= Decimal::ZERO {
            return Err(EscrowError::validation("Amount must be greater than zero"));
        }
        if request.amount < self.config.min_amount || request.amount > self.config.max_amount {
            return Err(EscrowError::validation(format!(
                "Amount must be between {} and {}",
                self.config.min_amount, self.config.max_amount
            )));
        }
        if request.fee < Decimal::ZERO {
            return Err(EscrowError::validation("Fee cannot be negative"));
        }
        if request.payer_id.trim().is_empty() || request.payee_id.trim().is_empty() {
            return Err(EscrowError::validation("Both parties must be identified"));
        }
        if request.payer_id == request.payee_id {
            return Err(EscrowError::validation("Payer and payee must differ"));
        }
        if let Some(days) = request.auto_release_days {
            if !(AUTO_RELEASE_DAYS_MIN..=AUTO_RELEASE_DAYS_MAX).contains(&days) {
                return Err(EscrowError::validation(format!(
                    "Auto-release window must be between {AUTO_RELEASE_DAYS_MIN} and {AUTO_RELEASE_DAYS_MAX} days"
                )));
            }
        }
        if let Some(days) = request.dispute_period_days {
            if !(DISPUTE_PERIOD_DAYS_MIN..=DISPUTE_PERIOD_DAYS_MAX).contains(&days) {
                return Err(EscrowError::validation(format!(
                    "Dispute window must be between {DISPUTE_PERIOD_DAYS_MIN} and {DISPUTE_PERIOD_DAYS_MAX} days"
                )));
            }
        }
        Ok(())
    }
}
