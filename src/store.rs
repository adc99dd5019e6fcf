//! Persistence seam for escrow records
//!
//! The store is injected into the service, never reached through module
//! state, so the engine stays independently testable. Conditional updates
//! use optimistic versioning: an update only commits when the caller's
//! snapshot version matches the stored one, which gives the per-record
//! compare-and-set the concurrency model requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::EscrowError;
use crate::models::{EscrowRecord, EscrowStatus};
use crate::EscrowResult;

/// Store contract consumed by the service and the scheduler
#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Persist a new record; exactly one escrow may exist per transaction
    async fn insert(&self, record: EscrowRecord) -> EscrowResult<EscrowRecord>;

    /// Fetch one record by id
    async fn get(&self, id: Uuid) -> EscrowResult<EscrowRecord>;

    /// Fetch the escrow backing a trade transaction, if any
    async fn find_by_transaction(&self, transaction_id: Uuid)
        -> EscrowResult<Option<EscrowRecord>>;

    /// Records where the party appears as payer or payee, newest first
    async fn list_by_party(
        &self,
        party_id: &str,
        status: Option<EscrowStatus>,
    ) -> EscrowResult<Vec<EscrowRecord>>;

    /// Records currently in the given status
    async fn list_by_status(&self, status: EscrowStatus) -> EscrowResult<Vec<EscrowRecord>>;

    /// Records carrying an OPEN dispute raised before the cutoff
    async fn list_with_open_disputes_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> EscrowResult<Vec<EscrowRecord>>;

    /// Conditional write: commits only if the caller's snapshot version
    /// matches the stored version, then bumps it. Losers get `Conflict`.
    async fn update(&self, record: EscrowRecord) -> EscrowResult<EscrowRecord>;
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<Uuid, EscrowRecord>,
    by_transaction: HashMap<Uuid, Uuid>,
}

/// In-memory store (in production, this would be a database)
#[derive(Default)]
pub struct MemoryEscrowStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowStore for MemoryEscrowStore {
    async fn insert(&self, record: EscrowRecord) -> EscrowResult<EscrowRecord> {
        let mut state = self.state.write().await;

        if state.by_transaction.contains_key(&record.transaction_id) {
            return Err(EscrowError::validation(format!(
                "Escrow already exists for transaction {}",
                record.transaction_id
            )));
        }
        if state.records.contains_key(&record.id) {
            return Err(EscrowError::store(format!(
                "Duplicate escrow id {}",
                record.id
            )));
        }

        state.by_transaction.insert(record.transaction_id, record.id);
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> EscrowResult<EscrowRecord> {
        self.state
            .read()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or(EscrowError::NotFound { id })
    }

    async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> EscrowResult<Option<EscrowRecord>> {
        let state = self.state.read().await;
        Ok(state
            .by_transaction
            .get(&transaction_id)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn list_by_party(
        &self,
        party_id: &str,
        status: Option<EscrowStatus>,
    ) -> EscrowResult<Vec<EscrowRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<EscrowRecord> = state
            .records
            .values()
            .filter(|r| r.payer_id == party_id || r.payee_id == party_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn list_by_status(&self, status: EscrowStatus) -> EscrowResult<Vec<EscrowRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<EscrowRecord> = state
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn list_with_open_disputes_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> EscrowResult<Vec<EscrowRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<EscrowRecord> = state
            .records
            .values()
            .filter(|r| {
                r.disputes
                    .iter()
                    .any(|d| !d.status.is_settled() && d.created_at < cutoff)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn update(&self, mut record: EscrowRecord) -> EscrowResult<EscrowRecord> {
        let mut state = self.state.write().await;

        let stored = state
            .records
            .get(&record.id)
            .ok_or(EscrowError::NotFound { id: record.id })?;
        if stored.version != record.version {
            return Err(EscrowError::Conflict { id: record.id });
        }

        record.version += 1;
        state.records.insert(record.id, record.clone());
        Ok(record)
    }
}
