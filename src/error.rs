//! Error types for the custody engine
//!
//! Every operation surfaces a typed error: creation-time validation failures,
//! illegal state transitions, time-gated preconditions, dispute lookups, and
//! lost races on conditional store updates.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{EscrowStatus, Trigger};

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Malformed input at creation or on a request payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Trigger not legal from the record's current status
    #[error("Invalid state transition: {trigger} not allowed from {current} (allowed sources: {allowed:?})")]
    InvalidTransition {
        current: EscrowStatus,
        trigger: Trigger,
        allowed: Vec<EscrowStatus>,
    },

    /// Dispute raised after the window closed
    #[error("Dispute window expired: delivery at {delivered_at}, window {dispute_period_days} days")]
    DisputeWindowExpired {
        delivered_at: DateTime<Utc>,
        dispute_period_days: u32,
    },

    /// Auto-release requested before the confirmation window elapsed
    #[error("Not eligible for auto-release in status {status}")]
    AutoReleaseNotEligible { status: EscrowStatus },

    /// Referenced dispute id does not exist on the record
    #[error("Dispute {dispute_id} not found")]
    DisputeNotFound { dispute_id: Uuid },

    /// A dispute is already open on the record
    #[error("Dispute {dispute_id} is still unresolved")]
    DisputeAlreadyOpen { dispute_id: Uuid },

    /// Resolution attempted on an already settled dispute
    #[error("Dispute {dispute_id} is already settled")]
    DisputeAlreadySettled { dispute_id: Uuid },

    /// Record does not exist in the store
    #[error("Escrow {id} not found")]
    NotFound { id: Uuid },

    /// Lost a race on a conditional update; re-read and retry
    #[error("Concurrent update conflict on escrow {id}")]
    Conflict { id: Uuid },

    /// Persistence layer failures
    #[error("Store error: {0}")]
    Store(String),

    /// Notification collaborator failures (never block a transition)
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EscrowError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a state transition error
    pub fn invalid_transition(
        current: EscrowStatus,
        trigger: Trigger,
        allowed: &[EscrowStatus],
    ) -> Self {
        Self::InvalidTransition {
            current,
            trigger,
            allowed: allowed.to_vec(),
        }
    }

    /// Create a store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create a notification error
    pub fn notification<S: Into<String>>(msg: S) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the caller should re-read the record and retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
