//! Core data models for the custody engine
//!
//! This module contains the escrow record, its nested dispute entity, the
//! status and trigger vocabulary, and the append-only audit trail types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bounds for the auto-release window, in days
pub const AUTO_RELEASE_DAYS_MIN: u32 = 1;
pub const AUTO_RELEASE_DAYS_MAX: u32 = 30;
/// Default auto-release window
pub const AUTO_RELEASE_DAYS_DEFAULT: u32 = 7;

/// Bounds for the dispute window, in days
pub const DISPUTE_PERIOD_DAYS_MIN: u32 = 1;
pub const DISPUTE_PERIOD_DAYS_MAX: u32 = 14;
/// Default dispute window
pub const DISPUTE_PERIOD_DAYS_DEFAULT: u32 = 3;

/// Escrow state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Created, awaiting deposit
    Pending,
    /// Funds deposited and held
    Funded,
    /// Item handed to the carrier
    InTransit,
    /// Item delivered to the buyer
    Delivered,
    /// Delivery confirmed by the buyer
    Confirmed,
    /// Under dispute
    Disputed,
    /// Funds released to the seller
    Released,
    /// Funds returned to the buyer
    Refunded,
    /// Cancelled before completion
    Cancelled,
    /// Expired without funding
    Expired,
}

impl EscrowStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Released | Self::Refunded | Self::Cancelled | Self::Expired
        )
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Funded => "FUNDED",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::Confirmed => "CONFIRMED",
            Self::Disputed => "DISPUTED",
            Self::Released => "RELEASED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(name)
    }
}

/// Triggers accepted by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Fund,
    MarkInTransit,
    Deliver,
    Confirm,
    Release,
    Refund,
    Cancel,
    OpenDispute,
    ResolveDispute,
    Expire,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fund => "fund",
            Self::MarkInTransit => "mark_in_transit",
            Self::Deliver => "deliver",
            Self::Confirm => "confirm",
            Self::Release => "release",
            Self::Refund => "refund",
            Self::Cancel => "cancel",
            Self::OpenDispute => "open_dispute",
            Self::ResolveDispute => "resolve_dispute",
            Self::Expire => "expire",
        };
        f.write_str(name)
    }
}

/// Supported settlement currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Currency {
    Brl,
    Usd,
    Eur,
}

/// Payment methods accepted by the upstream gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Pix,
    Boleto,
    Card,
    BankTransfer,
    Crypto,
}

/// Payment metadata supplied by the gateway collaborator; opaque to the
/// state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub method: PaymentMethod,
    pub payment_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub gateway: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl PaymentDetails {
    /// Minimal payment details for a given method
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            payment_id: None,
            transaction_hash: None,
            gateway: None,
            metadata: None,
        }
    }
}

/// Shipping address captured from the fulfillment collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub neighborhood: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

/// Delivery metadata stored as passthrough on `deliver`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub tracking_code: Option<String>,
    pub carrier: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actual_delivery: Option<DateTime<Utc>>,
    pub address: Option<DeliveryAddress>,
}

/// Dispute reason enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeReason {
    ItemNotReceived,
    ItemNotAsDescribed,
    DamagedItem,
    WrongItem,
    LateDelivery,
    Other,
}

impl std::fmt::Display for DisputeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ItemNotReceived => "ITEM_NOT_RECEIVED",
            Self::ItemNotAsDescribed => "ITEM_NOT_AS_DESCRIBED",
            Self::DamagedItem => "DAMAGED_ITEM",
            Self::WrongItem => "WRONG_ITEM",
            Self::LateDelivery => "LATE_DELIVERY",
            Self::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Dispute sub-lifecycle enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    /// Raised, awaiting an operator
    Open,
    /// Claimed by an operator
    UnderReview,
    /// Decision recorded
    Resolved,
    /// Archived
    Closed,
}

impl DisputeStatus {
    /// Check if this dispute no longer blocks the record
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

/// Dispute resolution enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    /// Funds go to the seller
    ReleaseToSeller,
    /// Funds return to the buyer
    RefundToBuyer,
    /// Recorded decision; fund split requires an explicit follow-up
    PartialRefund,
    /// Recorded decision; outcome requires an explicit follow-up
    Other,
}

/// Evidence reference attached to a dispute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub url: String,
    pub description: Option<String>,
}

/// Dispute entity, owned exclusively by its escrow record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub raised_by: String,
    pub reason: DisputeReason,
    pub description: String,
    pub evidence: Vec<Evidence>,
    pub status: DisputeStatus,
    pub resolution: Option<DisputeResolution>,
    pub admin_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    /// Create a new open dispute
    pub fn new(
        raised_by: String,
        reason: DisputeReason,
        description: String,
        evidence: Vec<Evidence>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            raised_by,
            reason,
            description,
            evidence,
            status: DisputeStatus::Open,
            resolution: None,
            admin_notes: None,
            resolved_by: None,
            created_at: now,
            resolved_at: None,
        }
    }
}

/// One entry of the append-only audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: EscrowStatus,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<String>,
    pub reason: String,
    pub notes: Option<String>,
}

/// Notification channel preferences, passthrough for the notification
/// collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPrefs {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: false,
            push_enabled: true,
        }
    }
}

/// Record priority for operator queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Free-form record metadata supplied by the creating system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub priority: Priority,
    pub category: Option<String>,
    pub notes: Option<String>,
}

/// Persisted state of one escrow; exactly one per underlying trade transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: Uuid,
    pub transaction_id: Uuid,

    // Parties
    pub payer_id: String,
    pub payee_id: String,

    // Amounts; total_amount == amount + fee at all times
    pub amount: Decimal,
    pub fee: Decimal,
    pub total_amount: Decimal,
    pub currency: Currency,

    pub status: EscrowStatus,

    // Per-transition timestamps, each set exactly once and never cleared
    pub funded_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,

    // Window configuration, captured at creation and immutable afterward
    pub auto_release_days: u32,
    pub dispute_period_days: u32,

    // Collaborator passthrough
    pub payment_details: PaymentDetails,
    pub delivery_info: Option<DeliveryInfo>,

    pub disputes: Vec<Dispute>,

    /// Append-only audit trail; the last entry always matches `status`
    pub status_history: Vec<StatusChange>,

    pub notifications: NotificationPrefs,
    pub metadata: RecordMetadata,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic-concurrency token, bumped by the store on every update
    pub version: u64,
}

impl EscrowRecord {
    /// Create a new escrow in `PENDING` with the default windows
    pub fn new(
        transaction_id: Uuid,
        payer_id: String,
        payee_id: String,
        amount: Decimal,
        fee: Decimal,
        currency: Currency,
        payment_details: PaymentDetails,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            id: Uuid::new_v4(),
            transaction_id,
            payer_id,
            payee_id,
            amount,
            fee,
            total_amount: amount + fee,
            currency,
            status: EscrowStatus::Pending,
            funded_at: None,
            delivered_at: None,
            confirmed_at: None,
            released_at: None,
            refunded_at: None,
            cancelled_at: None,
            expired_at: None,
            auto_release_days: AUTO_RELEASE_DAYS_DEFAULT,
            dispute_period_days: DISPUTE_PERIOD_DAYS_DEFAULT,
            payment_details,
            delivery_info: None,
            disputes: Vec::new(),
            status_history: Vec::new(),
            notifications: NotificationPrefs::default(),
            metadata: RecordMetadata::default(),
            created_at: now,
            updated_at: now,
            version: 0,
        };
        record.record_status(
            EscrowStatus::Pending,
            None,
            "Escrow created, awaiting deposit",
            None,
            now,
        );
        record
    }

    /// Recompute the derived total; called after every mutation
    pub(crate) fn recompute_total(&mut self) {
        self.total_amount = self.amount + self.fee;
    }

    /// Append one audit trail entry
    pub(crate) fn record_status(
        &mut self,
        status: EscrowStatus,
        changed_by: Option<&str>,
        reason: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) {
        self.status_history.push(StatusChange {
            status,
            changed_at: now,
            changed_by: changed_by.map(str::to_owned),
            reason: reason.to_owned(),
            notes: notes.map(str::to_owned),
        });
    }

    /// The dispute currently blocking the record, if any
    pub fn unresolved_dispute(&self) -> Option<&Dispute> {
        self.disputes.iter().find(|d| !d.status.is_settled())
    }

    /// The most recently raised dispute
    pub fn latest_dispute(&self) -> Option<&Dispute> {
        self.disputes.last()
    }

    /// Look up a dispute by id
    pub fn dispute(&self, dispute_id: Uuid) -> Option<&Dispute> {
        self.disputes.iter().find(|d| d.id == dispute_id)
    }

    pub(crate) fn dispute_mut(&mut self, dispute_id: Uuid) -> Option<&mut Dispute> {
        self.disputes.iter_mut().find(|d| d.id == dispute_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record() -> EscrowRecord {
        EscrowRecord::new(
            Uuid::new_v4(),
            "buyer-1".to_string(),
            "seller-1".to_string(),
            Decimal::from(100),
            Decimal::from(5),
            Currency::Brl,
            PaymentDetails::new(PaymentMethod::Pix),
            Utc::now(),
        )
    }

    #[test]
    fn new_record_totals_and_initial_history() {
        let record = base_record();

        assert_eq!(record.status, EscrowStatus::Pending);
        assert_eq!(record.total_amount, Decimal::from(105));
        assert_eq!(record.auto_release_days, 7);
        assert_eq!(record.dispute_period_days, 3);
        assert_eq!(record.status_history.len(), 1);
        assert_eq!(record.status_history[0].status, EscrowStatus::Pending);
    }

    #[test]
    fn recompute_total_tracks_amount_and_fee() {
        let mut record = base_record();
        record.fee = Decimal::new(750, 2); // 7.50
        record.recompute_total();

        assert_eq!(record.total_amount, Decimal::new(10750, 2));
    }

    #[test]
    fn unresolved_dispute_ignores_settled_entries() {
        let mut record = base_record();
        let now = Utc::now();

        let mut settled = Dispute::new(
            "buyer-1".to_string(),
            DisputeReason::DamagedItem,
            "arrived broken".to_string(),
            vec![],
            now,
        );
        settled.status = DisputeStatus::Resolved;
        record.disputes.push(settled);
        assert!(record.unresolved_dispute().is_none());

        let open = Dispute::new(
            "buyer-1".to_string(),
            DisputeReason::WrongItem,
            "wrong color".to_string(),
            vec![],
            now,
        );
        let open_id = open.id;
        record.disputes.push(open);
        assert_eq!(record.unresolved_dispute().unwrap().id, open_id);
    }

    #[test]
    fn status_serializes_in_wire_vocabulary() {
        let json = serde_json::to_string(&EscrowStatus::InTransit).unwrap();
        assert_eq!(json, "\"IN_TRANSIT\"");

        let reason = serde_json::to_string(&DisputeReason::ItemNotAsDescribed).unwrap();
        assert_eq!(reason, "\"ITEM_NOT_AS_DESCRIBED\"");
    }

    #[test]
    fn terminal_statuses() {
        for status in [
            EscrowStatus::Released,
            EscrowStatus::Refunded,
            EscrowStatus::Cancelled,
            EscrowStatus::Expired,
        ] {
            assert!(status.is_terminal());
        }
        for status in [
            EscrowStatus::Pending,
            EscrowStatus::Funded,
            EscrowStatus::InTransit,
            EscrowStatus::Delivered,
            EscrowStatus::Confirmed,
            EscrowStatus::Disputed,
        ] {
            assert!(!status.is_terminal());
        }
    }
}
