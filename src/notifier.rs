//! Notification seam for status transitions
//!
//! The notification collaborator is told about every committed status change.
//! Delivery is fire-and-forget: a notifier failure is logged by the service
//! and never blocks or reverses a transition.

use async_trait::async_trait;
use tracing::info;

use crate::models::{EscrowRecord, StatusChange};
use crate::EscrowResult;

/// Notifier contract consumed by the service
#[async_trait]
pub trait EscrowNotifier: Send + Sync {
    /// Called once per committed status change, after the store write
    async fn status_changed(
        &self,
        record: &EscrowRecord,
        change: &StatusChange,
    ) -> EscrowResult<()>;
}

/// Notifier that drops everything; useful in tests and batch tooling
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl EscrowNotifier for NoopNotifier {
    async fn status_changed(
        &self,
        _record: &EscrowRecord,
        _change: &StatusChange,
    ) -> EscrowResult<()> {
        Ok(())
    }
}

/// Notifier that emits a structured log line per transition
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl EscrowNotifier for LogNotifier {
    async fn status_changed(
        &self,
        record: &EscrowRecord,
        change: &StatusChange,
    ) -> EscrowResult<()> {
        info!(
            escrow_id = %record.id,
            transaction_id = %record.transaction_id,
            status = %change.status,
            reason = %change.reason,
            "escrow status changed"
        );
        Ok(())
    }
}
