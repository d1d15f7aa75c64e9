//! Chain instantiation and the step state machine / decision applier.
//!
//! The engine is pure: it takes a chain value plus a decision and returns
//! the transformed chain together with the audit record for the
//! transition. Persisting both atomically is the store's job
//! (`ChainStore::commit_transition`); the orchestrator wires the two.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::definition::ChainDefinition;
use crate::domain::chain::{
    ChainId, ChainInstance, ChainStatus, EntityRef, StepInstance, StepStatus,
};
use crate::domain::decision::{Decision, DecisionAction, DecisionRecord, DecisionRecordId, Verdict};
use crate::domain::role::{Actor, ActorId, SYSTEM_ACTOR_ID};
use crate::errors::WorkflowError;
use crate::registry::{qualify, Qualification};

/// Result of one committed-to-be transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub chain: ChainInstance,
    pub record: DecisionRecord,
    /// Position of the step that became current through this transition.
    pub activated_position: Option<u32>,
    /// Terminal chain status reached by this transition, if any.
    pub terminal_status: Option<ChainStatus>,
}

/// Role string recorded when the entity owner withdraws the request;
/// cancellation is not tied to any approval role.
const CANCELLING_ACTOR_ROLE: &str = "owner";

#[derive(Clone, Debug, Default)]
pub struct ChainEngine;

impl ChainEngine {
    pub fn new() -> Self {
        Self
    }

    /// Snapshot a validated definition into a fresh chain instance. The
    /// first step is active immediately; all steps start `pending`.
    pub fn instantiate(
        &self,
        definition: &ChainDefinition,
        entity: EntityRef,
        now: DateTime<Utc>,
    ) -> Result<ChainInstance, WorkflowError> {
        definition.validate()?;
        if definition.workflow != entity.workflow {
            return Err(WorkflowError::Configuration(format!(
                "definition is for {} but entity is {}",
                definition.workflow, entity.workflow
            )));
        }

        let steps = definition
            .ordered_steps()
            .into_iter()
            .enumerate()
            .map(|(index, template)| StepInstance {
                position: template.position,
                required_role: template.required_role,
                fallback_roles: template.fallback_roles,
                status: StepStatus::Pending,
                decided_by: None,
                decided_as_fallback: false,
                remarks: None,
                decided_at: None,
                auto_resolved_at: None,
                activated_at: (index == 0).then_some(now),
            })
            .collect();

        Ok(ChainInstance {
            id: ChainId(Uuid::new_v4().to_string()),
            tenant_id: definition.tenant_id.clone(),
            entity,
            definition_version: definition.version,
            auto_approve_after_days: definition.auto_approve_after_days,
            day_convention: definition.day_convention,
            status: ChainStatus::InProgress,
            steps,
            state_version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a decision to the chain's current step. Returns the updated
    /// chain and the audit record; fails without mutation when the chain
    /// is terminal, the actor is unqualified, or the transition is not
    /// legal for the chain's snapshot.
    pub fn apply(
        &self,
        chain: ChainInstance,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        match decision {
            Decision::Approve { actor, remarks } => {
                self.apply_human(chain, actor, Verdict::Approve, remarks.clone(), now)
            }
            Decision::Reject { actor, remarks } => {
                self.apply_human(chain, actor, Verdict::Reject, remarks.clone(), now)
            }
            Decision::AutoApprove => self.apply_auto_approve(chain, now),
            Decision::Cancel { actor_id } => self.apply_cancel(chain, actor_id, now),
        }
    }

    fn apply_human(
        &self,
        mut chain: ChainInstance,
        actor: &Actor,
        verdict: Verdict,
        remarks: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let index = self.current_index(&chain)?;
        let step = &chain.steps[index];

        let qualification = qualify(actor.role, step).ok_or(WorkflowError::UnauthorizedActor {
            actor_role: actor.role,
            required_role: step.required_role,
            position: step.position,
        })?;
        let decided_as_fallback = qualification == Qualification::Fallback;

        let position = step.position;
        let step = &mut chain.steps[index];
        step.decided_by = Some(actor.id.clone());
        step.decided_as_fallback = decided_as_fallback;
        step.remarks = remarks.clone();
        step.decided_at = Some(now);

        let (activated_position, terminal_status, action) = match verdict {
            Verdict::Approve => {
                step.status = StepStatus::Approved;
                let (activated, terminal) = self.advance(&mut chain, index, now);
                (activated, terminal, DecisionAction::Approved)
            }
            Verdict::Reject => {
                step.status = StepStatus::Rejected;
                self.terminate(&mut chain, ChainStatus::Rejected, index + 1);
                (None, Some(ChainStatus::Rejected), DecisionAction::Rejected)
            }
        };

        self.finish(chain, now, position, actor.id.clone(), actor.role.as_str(), action, remarks, activated_position, terminal_status)
    }

    fn apply_auto_approve(
        &self,
        mut chain: ChainInstance,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        if chain.auto_approve_after_days == 0 {
            return Err(WorkflowError::InvalidTransition {
                chain_id: chain.id.clone(),
                status: chain.status,
                attempted: "auto_approve",
            });
        }
        let index = self.current_index(&chain)?;
        let position = chain.steps[index].position;

        let step = &mut chain.steps[index];
        step.status = StepStatus::Approved;
        step.decided_by = Some(ActorId(SYSTEM_ACTOR_ID.to_string()));
        step.decided_as_fallback = false;
        step.auto_resolved_at = Some(now);

        let (activated_position, terminal_status) = self.advance(&mut chain, index, now);

        self.finish(
            chain,
            now,
            position,
            ActorId(SYSTEM_ACTOR_ID.to_string()),
            SYSTEM_ACTOR_ID,
            DecisionAction::AutoApproved,
            None,
            activated_position,
            terminal_status,
        )
    }

    fn apply_cancel(
        &self,
        mut chain: ChainInstance,
        actor_id: &ActorId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        if chain.status != ChainStatus::InProgress {
            return Err(WorkflowError::InvalidTransition {
                chain_id: chain.id.clone(),
                status: chain.status,
                attempted: "cancel",
            });
        }
        let index = self.current_index(&chain)?;
        let position = chain.steps[index].position;

        self.terminate(&mut chain, ChainStatus::Cancelled, index);

        self.finish(
            chain,
            now,
            position,
            actor_id.clone(),
            CANCELLING_ACTOR_ROLE,
            DecisionAction::Cancelled,
            None,
            None,
            Some(ChainStatus::Cancelled),
        )
    }

    /// Index of the step currently accepting decisions.
    fn current_index(&self, chain: &ChainInstance) -> Result<usize, WorkflowError> {
        if chain.status != ChainStatus::InProgress {
            return Err(WorkflowError::NoCurrentStep(chain.id.clone()));
        }
        chain
            .steps
            .iter()
            .position(|step| step.status == StepStatus::Pending)
            .ok_or_else(|| WorkflowError::NoCurrentStep(chain.id.clone()))
    }

    /// After approving step `index`: either the next step becomes current
    /// or the chain is fully approved.
    fn advance(
        &self,
        chain: &mut ChainInstance,
        index: usize,
        now: DateTime<Utc>,
    ) -> (Option<u32>, Option<ChainStatus>) {
        match chain.steps.get_mut(index + 1) {
            Some(next) => {
                next.activated_at = Some(now);
                (Some(next.position), None)
            }
            None => {
                chain.status = ChainStatus::Approved;
                (None, Some(ChainStatus::Approved))
            }
        }
    }

    /// Terminal transition: all pending steps from `from_index` onwards
    /// are skipped in the same unit.
    fn terminate(&self, chain: &mut ChainInstance, status: ChainStatus, from_index: usize) {
        chain.status = status;
        for step in chain.steps.iter_mut().skip(from_index) {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        mut chain: ChainInstance,
        now: DateTime<Utc>,
        position: u32,
        actor_id: ActorId,
        actor_role: &str,
        action: DecisionAction,
        remarks: Option<String>,
        activated_position: Option<u32>,
        terminal_status: Option<ChainStatus>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        chain.state_version += 1;
        chain.updated_at = now;

        let record = DecisionRecord {
            id: DecisionRecordId(Uuid::new_v4().to_string()),
            chain_id: chain.id.clone(),
            step_position: position,
            actor_id,
            actor_role: actor_role.to_string(),
            action,
            remarks,
            recorded_at: now,
        };

        Ok(TransitionOutcome { chain, record, activated_position, terminal_status })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ChainEngine, TransitionOutcome};
    use crate::definition::{ChainDefinition, StepTemplate};
    use crate::domain::chain::{ChainStatus, EntityRef, StepStatus};
    use crate::domain::decision::{Decision, DecisionAction};
    use crate::domain::role::{Actor, ActorId, Role, TenantId, WorkflowKind, SYSTEM_ACTOR_ID};
    use crate::errors::WorkflowError;
    use crate::escalation::DayConvention;

    fn three_step_definition() -> ChainDefinition {
        ChainDefinition {
            workflow: WorkflowKind::Leave,
            tenant_id: TenantId("acme".to_string()),
            version: 3,
            multi_level: true,
            auto_approve_after_days: 0,
            day_convention: DayConvention::Calendar,
            steps: vec![
                StepTemplate::new(1, Role::Manager, vec![Role::HrManager]),
                StepTemplate::new(2, Role::HrManager, vec![Role::SuperAdmin]),
                StepTemplate::new(3, Role::SuperAdmin, vec![]),
            ],
        }
    }

    fn single_step_auto_definition(days: u32) -> ChainDefinition {
        ChainDefinition {
            workflow: WorkflowKind::Expense,
            tenant_id: TenantId("acme".to_string()),
            version: 1,
            multi_level: false,
            auto_approve_after_days: days,
            day_convention: DayConvention::Calendar,
            steps: vec![StepTemplate::new(1, Role::Manager, vec![])],
        }
    }

    fn approve(actor: Actor) -> Decision {
        Decision::Approve { actor, remarks: None }
    }

    #[test]
    fn instantiate_snapshots_definition_and_activates_first_step() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&three_step_definition(), EntityRef::new(WorkflowKind::Leave, "lv-9"), now)
            .expect("instantiate");

        assert_eq!(chain.status, ChainStatus::InProgress);
        assert_eq!(chain.definition_version, 3);
        assert_eq!(chain.steps.len(), 3);
        assert_eq!(chain.steps[0].activated_at, Some(now));
        assert_eq!(chain.steps[1].activated_at, None);
        assert!(chain.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(chain.current_step().map(|s| s.position), Some(1));
    }

    #[test]
    fn instantiate_rejects_workflow_mismatch() {
        let engine = ChainEngine::new();
        let result = engine.instantiate(
            &three_step_definition(),
            EntityRef::new(WorkflowKind::Expense, "exp-1"),
            Utc::now(),
        );
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
    }

    #[test]
    fn full_approval_in_order_finalizes_the_chain() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&three_step_definition(), EntityRef::new(WorkflowKind::Leave, "lv-1"), now)
            .expect("instantiate");

        let out1 = engine
            .apply(chain, &approve(Actor::new("u-mgr", Role::Manager)), now)
            .expect("step 1");
        assert_eq!(out1.activated_position, Some(2));
        assert_eq!(out1.terminal_status, None);
        assert!(!out1.chain.steps[0].decided_as_fallback);

        let out2 = engine
            .apply(out1.chain, &approve(Actor::new("u-hr", Role::HrManager)), now)
            .expect("step 2");
        assert_eq!(out2.activated_position, Some(3));

        let out3 = engine
            .apply(out2.chain, &approve(Actor::new("u-admin", Role::SuperAdmin)), now)
            .expect("step 3");
        assert_eq!(out3.terminal_status, Some(ChainStatus::Approved));
        assert_eq!(out3.record.action, DecisionAction::Approved);
        assert_eq!(out3.chain.status, ChainStatus::Approved);
        assert!(out3.chain.steps.iter().all(|s| s.status == StepStatus::Approved));
        assert_eq!(out3.chain.state_version, 4);
    }

    #[test]
    fn fallback_decision_is_flagged_and_advances_the_chain() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&three_step_definition(), EntityRef::new(WorkflowKind::Leave, "lv-2"), now)
            .expect("instantiate");

        // hr_manager acts as fallback for the manager step.
        let out = engine
            .apply(chain, &approve(Actor::new("u-hr", Role::HrManager)), now)
            .expect("fallback approve");

        assert!(out.chain.steps[0].decided_as_fallback);
        assert_eq!(out.chain.steps[0].decided_by, Some(ActorId("u-hr".to_string())));
        assert_eq!(out.chain.current_step().map(|s| s.position), Some(2));
    }

    #[test]
    fn rejection_terminates_and_skips_all_later_steps() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&three_step_definition(), EntityRef::new(WorkflowKind::Leave, "lv-3"), now)
            .expect("instantiate");

        let out = engine
            .apply(
                chain,
                &Decision::Reject {
                    actor: Actor::new("u-mgr", Role::Manager),
                    remarks: Some("dates overlap the release".to_string()),
                },
                now,
            )
            .expect("reject");

        assert_eq!(out.terminal_status, Some(ChainStatus::Rejected));
        assert_eq!(out.chain.steps[0].status, StepStatus::Rejected);
        assert_eq!(out.chain.steps[0].remarks.as_deref(), Some("dates overlap the release"));
        assert_eq!(out.chain.steps[1].status, StepStatus::Skipped);
        assert_eq!(out.chain.steps[2].status, StepStatus::Skipped);
        assert_eq!(out.record.action, DecisionAction::Rejected);
    }

    #[test]
    fn unqualified_actor_is_refused_without_mutation() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&three_step_definition(), EntityRef::new(WorkflowKind::Leave, "lv-4"), now)
            .expect("instantiate");
        let before = chain.clone();

        let result = engine.apply(chain.clone(), &approve(Actor::new("u-emp", Role::Employee)), now);
        assert!(matches!(result, Err(WorkflowError::UnauthorizedActor { position: 1, .. })));
        assert_eq!(chain, before);
    }

    #[test]
    fn deciding_a_terminal_chain_fails_with_no_current_step() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&single_step_auto_definition(0), EntityRef::new(WorkflowKind::Expense, "exp-4"), now)
            .expect("instantiate");
        let approved = engine
            .apply(chain, &approve(Actor::new("u-mgr", Role::Manager)), now)
            .expect("approve");

        let result =
            engine.apply(approved.chain, &approve(Actor::new("u-mgr", Role::Manager)), now);
        assert!(matches!(result, Err(WorkflowError::NoCurrentStep(_))));
    }

    #[test]
    fn auto_approve_resolves_the_current_step_as_system() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&single_step_auto_definition(2), EntityRef::new(WorkflowKind::Expense, "exp-5"), now)
            .expect("instantiate");

        let later = now + Duration::days(3);
        let out = engine.apply(chain, &Decision::AutoApprove, later).expect("auto approve");

        assert_eq!(out.chain.status, ChainStatus::Approved);
        assert_eq!(out.record.action, DecisionAction::AutoApproved);
        assert_eq!(out.record.actor_role, SYSTEM_ACTOR_ID);
        let step = &out.chain.steps[0];
        assert_eq!(step.auto_resolved_at, Some(later));
        assert_eq!(step.decided_at, None);
        assert_eq!(step.decided_by, Some(ActorId(SYSTEM_ACTOR_ID.to_string())));
    }

    #[test]
    fn auto_approve_mid_chain_activates_the_next_step_at_sweep_time() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let mut definition = three_step_definition();
        definition.auto_approve_after_days = 2;
        let chain = engine
            .instantiate(&definition, EntityRef::new(WorkflowKind::Leave, "lv-11"), now)
            .expect("instantiate");

        let sweep_time = now + Duration::days(3);
        let out = engine.apply(chain, &Decision::AutoApprove, sweep_time).expect("auto approve");

        assert_eq!(out.chain.status, ChainStatus::InProgress);
        assert_eq!(out.activated_position, Some(2));
        assert_eq!(out.chain.steps[0].status, StepStatus::Approved);
        assert_eq!(out.chain.steps[0].auto_resolved_at, Some(sweep_time));
        assert_eq!(out.chain.steps[1].activated_at, Some(sweep_time));
        assert_eq!(out.chain.current_step().map(|s| s.position), Some(2));
    }

    #[test]
    fn auto_approve_is_illegal_when_escalation_is_disabled() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&single_step_auto_definition(0), EntityRef::new(WorkflowKind::Expense, "exp-6"), now)
            .expect("instantiate");

        let result = engine.apply(chain, &Decision::AutoApprove, now);
        assert!(matches!(result, Err(WorkflowError::InvalidTransition { attempted: "auto_approve", .. })));
    }

    #[test]
    fn human_decision_sets_decided_at_but_never_auto_resolved_at() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&single_step_auto_definition(2), EntityRef::new(WorkflowKind::Expense, "exp-7"), now)
            .expect("instantiate");

        let out = engine
            .apply(chain, &approve(Actor::new("u-mgr", Role::Manager)), now)
            .expect("approve");
        let step = &out.chain.steps[0];
        assert_eq!(step.decided_at, Some(now));
        assert_eq!(step.auto_resolved_at, None);
    }

    #[test]
    fn cancel_skips_every_open_step_and_records_cancellation() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&three_step_definition(), EntityRef::new(WorkflowKind::Leave, "lv-8"), now)
            .expect("instantiate");
        let mid = engine
            .apply(chain, &approve(Actor::new("u-mgr", Role::Manager)), now)
            .expect("step 1");

        let out = engine
            .apply(mid.chain, &Decision::Cancel { actor_id: ActorId("u-owner".to_string()) }, now)
            .expect("cancel");

        assert_eq!(out.chain.status, ChainStatus::Cancelled);
        assert_eq!(out.chain.steps[0].status, StepStatus::Approved);
        assert_eq!(out.chain.steps[1].status, StepStatus::Skipped);
        assert_eq!(out.chain.steps[2].status, StepStatus::Skipped);
        assert_eq!(out.record.action, DecisionAction::Cancelled);
        assert_eq!(out.record.step_position, 2);
    }

    #[test]
    fn cancel_on_a_decided_chain_is_an_invalid_transition() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let chain = engine
            .instantiate(&single_step_auto_definition(0), EntityRef::new(WorkflowKind::Expense, "exp-9"), now)
            .expect("instantiate");
        let approved = engine
            .apply(chain, &approve(Actor::new("u-mgr", Role::Manager)), now)
            .expect("approve");

        let result = engine.apply(
            approved.chain,
            &Decision::Cancel { actor_id: ActorId("u-owner".to_string()) },
            now,
        );
        assert!(matches!(result, Err(WorkflowError::InvalidTransition { attempted: "cancel", .. })));
    }

    #[test]
    fn at_most_one_pending_current_step_throughout_a_run() {
        let engine = ChainEngine::new();
        let now = Utc::now();
        let mut chain = engine
            .instantiate(&three_step_definition(), EntityRef::new(WorkflowKind::Leave, "lv-10"), now)
            .expect("instantiate");

        let actors = [
            Actor::new("u-mgr", Role::Manager),
            Actor::new("u-hr", Role::HrManager),
            Actor::new("u-admin", Role::SuperAdmin),
        ];
        for actor in actors {
            let active: Vec<_> =
                chain.steps.iter().filter(|s| s.activated_at.is_some() && s.status == StepStatus::Pending).collect();
            assert_eq!(active.len(), 1, "exactly one active pending step");
            let TransitionOutcome { chain: next, .. } =
                engine.apply(chain, &approve(actor), now).expect("approve");
            chain = next;
        }
        assert_eq!(chain.status, ChainStatus::Approved);
    }
}
