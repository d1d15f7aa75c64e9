//! Top-level façade of the approval engine: creates chain instances from
//! definitions, applies decisions and cancellations through the atomic
//! store path, answers queries, and drives the escalation sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::definition::DefinitionSource;
use crate::domain::chain::{ChainId, ChainInstance, ChainStatus, EntityRef, StepInstance};
use crate::domain::decision::{Decision, DecisionRecord};
pub use crate::domain::decision::Verdict;
use crate::domain::role::{Actor, ActorId, TenantId};
use crate::engine::{ChainEngine, TransitionOutcome};
use crate::errors::WorkflowError;
use crate::escalation;
use crate::events::{
    ChainStatusChanged, NotificationEvent, NotificationHook, StatusListener,
};
use crate::store::{AuditTrail, ChainStore, StoreError};

/// What one escalation sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub examined: usize,
    pub auto_approved: usize,
    /// Chains that moved underneath the sweep (a human decision raced the
    /// timer and won). Not errors; the next sweep sees the fresh state.
    pub conflicts: usize,
}

pub struct Orchestrator {
    engine: ChainEngine,
    store: Arc<dyn ChainStore>,
    audit: Arc<dyn AuditTrail>,
    definitions: Arc<dyn DefinitionSource>,
    notifications: Arc<dyn NotificationHook>,
    listener: Arc<dyn StatusListener>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ChainStore>,
        audit: Arc<dyn AuditTrail>,
        definitions: Arc<dyn DefinitionSource>,
        notifications: Arc<dyn NotificationHook>,
        listener: Arc<dyn StatusListener>,
    ) -> Self {
        Self { engine: ChainEngine::new(), store, audit, definitions, notifications, listener }
    }

    /// Instantiate a chain for a freshly submitted entity. A missing or
    /// malformed definition blocks submission rather than defaulting.
    pub async fn start(
        &self,
        entity: EntityRef,
        tenant_id: TenantId,
    ) -> Result<ChainId, WorkflowError> {
        let definition = self
            .definitions
            .resolve(entity.workflow, &tenant_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                WorkflowError::Configuration(format!(
                    "no approval chain configured for {}/{}",
                    tenant_id.0, entity.workflow
                ))
            })?;

        let chain = self.engine.instantiate(&definition, entity, Utc::now())?;
        self.store.insert(&chain).await.map_err(storage_error)?;

        info!(
            event_name = "workflow.chain_started",
            chain_id = %chain.id,
            tenant_id = %chain.tenant_id.0,
            workflow = %chain.entity.workflow,
            definition_version = chain.definition_version,
            steps = chain.steps.len(),
            "approval chain started"
        );

        if let Some(step) = chain.current_step() {
            self.notifications
                .notify_actor(
                    step.required_role,
                    &chain.entity,
                    NotificationEvent::StepActivated { position: step.position },
                )
                .await;
        }

        Ok(chain.id)
    }

    pub async fn chain(&self, chain_id: &ChainId) -> Result<ChainInstance, WorkflowError> {
        self.store
            .find(chain_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| WorkflowError::ChainNotFound(chain_id.clone()))
    }

    /// The step currently awaiting a decision, or `None` once terminal.
    pub async fn current_step(
        &self,
        chain_id: &ChainId,
    ) -> Result<Option<StepInstance>, WorkflowError> {
        Ok(self.chain(chain_id).await?.current_step().cloned())
    }

    /// Apply a human decision to the chain's current step.
    pub async fn decide(
        &self,
        chain_id: &ChainId,
        actor: Actor,
        verdict: Verdict,
        remarks: Option<String>,
    ) -> Result<ChainInstance, WorkflowError> {
        let chain = self.chain(chain_id).await?;
        let decision = match verdict {
            Verdict::Approve => Decision::Approve { actor, remarks },
            Verdict::Reject => Decision::Reject { actor, remarks },
        };
        self.transition(chain, &decision, Utc::now()).await
    }

    /// Withdraw the chain. Idempotent on an already-cancelled chain; any
    /// other terminal status refuses the transition.
    pub async fn cancel(
        &self,
        chain_id: &ChainId,
        actor_id: ActorId,
    ) -> Result<ChainInstance, WorkflowError> {
        let chain = self.chain(chain_id).await?;
        if chain.status == ChainStatus::Cancelled {
            return Ok(chain);
        }
        self.transition(chain, &Decision::Cancel { actor_id }, Utc::now()).await
    }

    /// Decision history of a chain, oldest first.
    pub async fn audit_log(
        &self,
        chain_id: &ChainId,
    ) -> Result<Vec<DecisionRecord>, WorkflowError> {
        // Existence check keeps "unknown chain" distinct from "no decisions yet".
        self.chain(chain_id).await?;
        self.audit.list_for(chain_id).await.map_err(storage_error)
    }

    /// One pass of the escalation timer: auto-approve every current step
    /// whose waiting period elapsed. Safe to run concurrently; a raced
    /// chain is skipped, not failed.
    pub async fn run_escalation_sweep(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, WorkflowError> {
        let candidates = self.store.list_escalation_candidates().await.map_err(storage_error)?;
        let mut outcome = SweepOutcome { examined: candidates.len(), ..SweepOutcome::default() };

        for chain in candidates {
            if !escalation::is_due(&chain, now) {
                continue;
            }
            let chain_id = chain.id.clone();
            match self.transition(chain, &Decision::AutoApprove, now).await {
                Ok(_) => outcome.auto_approved += 1,
                Err(error) if error.is_conflict() => {
                    outcome.conflicts += 1;
                    info!(
                        event_name = "workflow.escalation_raced",
                        chain_id = %chain_id,
                        "chain resolved by another actor before the sweep committed"
                    );
                }
                Err(error) => {
                    warn!(
                        event_name = "workflow.escalation_failed",
                        chain_id = %chain_id,
                        error = %error,
                        "escalation sweep could not auto-approve chain"
                    );
                    return Err(error);
                }
            }
        }

        Ok(outcome)
    }

    /// Shared commit path for every mutation: pure engine transition, then
    /// one atomic store commit (chain update + audit append) guarded by
    /// the version observed at load time, then outbound effects.
    async fn transition(
        &self,
        chain: ChainInstance,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<ChainInstance, WorkflowError> {
        let expected_version = chain.state_version;
        let outcome = self.engine.apply(chain, decision, now)?;

        self.store
            .commit_transition(&outcome.chain, expected_version, &outcome.record)
            .await
            .map_err(|error| match error {
                StoreError::VersionConflict { chain_id, .. } => WorkflowError::StaleStep {
                    chain_id,
                    position: outcome.record.step_position,
                },
                other => storage_error(other),
            })?;

        self.emit_effects(&outcome).await;
        Ok(outcome.chain)
    }

    async fn emit_effects(&self, outcome: &TransitionOutcome) {
        let chain = &outcome.chain;
        info!(
            event_name = "workflow.transition_committed",
            chain_id = %chain.id,
            step_position = outcome.record.step_position,
            action = outcome.record.action.as_str(),
            actor_id = %outcome.record.actor_id.0,
            state_version = chain.state_version,
            "approval transition committed"
        );

        if let Some(step) = chain.step_at(outcome.record.step_position) {
            self.notifications
                .notify_actor(
                    step.required_role,
                    &chain.entity,
                    NotificationEvent::DecisionRecorded {
                        position: step.position,
                        action: outcome.record.action,
                    },
                )
                .await;
        }

        if let Some(position) = outcome.activated_position {
            if let Some(step) = chain.step_at(position) {
                self.notifications
                    .notify_actor(
                        step.required_role,
                        &chain.entity,
                        NotificationEvent::StepActivated { position },
                    )
                    .await;
            }
        }

        if let Some(status) = outcome.terminal_status {
            self.listener
                .chain_status_changed(ChainStatusChanged {
                    chain_id: chain.id.clone(),
                    entity: chain.entity.clone(),
                    status,
                })
                .await;
        }
    }
}

fn storage_error(error: StoreError) -> WorkflowError {
    WorkflowError::Storage(error.to_string())
}
