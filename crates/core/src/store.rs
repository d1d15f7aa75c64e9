//! Storage seams for chain instances and the audit trail, plus the
//! in-memory implementation used by tests and embedded callers.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::chain::{ChainId, ChainInstance, ChainStatus};
use crate::domain::decision::DecisionRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The chain moved underneath the caller; the losing side of a race.
    #[error("version conflict for chain {chain_id}: expected state_version {expected}")]
    VersionConflict { chain_id: ChainId, expected: u64 },
    #[error("chain already exists: {0}")]
    DuplicateChain(ChainId),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

/// Persistence of chain instances. Mutations after creation go through
/// `commit_transition`, which must persist the chain update and the audit
/// append as one atomic unit guarded by the expected `state_version`.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn insert(&self, chain: &ChainInstance) -> Result<(), StoreError>;

    async fn find(&self, id: &ChainId) -> Result<Option<ChainInstance>, StoreError>;

    /// Replace the stored chain iff its persisted `state_version` equals
    /// `expected_version`, appending `record` in the same unit. A failed
    /// check leaves both untouched and returns `VersionConflict`.
    async fn commit_transition(
        &self,
        chain: &ChainInstance,
        expected_version: u64,
        record: &DecisionRecord,
    ) -> Result<(), StoreError>;

    /// In-progress chains with a non-zero auto-approve window; the sweep
    /// decides which of them are actually due.
    async fn list_escalation_candidates(&self) -> Result<Vec<ChainInstance>, StoreError>;
}

/// Append-only read side of the decision history.
#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Records for one chain, ordered by `recorded_at` ascending; stable
    /// across reads.
    async fn list_for(&self, chain_id: &ChainId) -> Result<Vec<DecisionRecord>, StoreError>;
}

#[derive(Default)]
struct InMemoryState {
    chains: HashMap<String, ChainInstance>,
    records: Vec<DecisionRecord>,
}

/// Single-process store; one lock covers chains and audit records so that
/// `commit_transition` is atomic the same way the SQL transaction is.
#[derive(Default)]
pub struct InMemoryChainStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn insert(&self, chain: &ChainInstance) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.chains.contains_key(&chain.id.0) {
            return Err(StoreError::DuplicateChain(chain.id.clone()));
        }
        state.chains.insert(chain.id.0.clone(), chain.clone());
        Ok(())
    }

    async fn find(&self, id: &ChainId) -> Result<Option<ChainInstance>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.chains.get(&id.0).cloned())
    }

    async fn commit_transition(
        &self,
        chain: &ChainInstance,
        expected_version: u64,
        record: &DecisionRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored_version = state.chains.get(&chain.id.0).map(|stored| stored.state_version);
        match stored_version {
            Some(version) if version == expected_version => {
                state.chains.insert(chain.id.0.clone(), chain.clone());
                state.records.push(record.clone());
                Ok(())
            }
            _ => Err(StoreError::VersionConflict {
                chain_id: chain.id.clone(),
                expected: expected_version,
            }),
        }
    }

    async fn list_escalation_candidates(&self) -> Result<Vec<ChainInstance>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .chains
            .values()
            .filter(|chain| {
                chain.status == ChainStatus::InProgress && chain.auto_approve_after_days > 0
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditTrail for InMemoryChainStore {
    async fn list_for(&self, chain_id: &ChainId) -> Result<Vec<DecisionRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<DecisionRecord> = state
            .records
            .iter()
            .filter(|record| record.chain_id == *chain_id)
            .cloned()
            .collect();
        // Stable: equal timestamps keep append order.
        records.sort_by_key(|record| record.recorded_at);
        Ok(records)
    }
}
