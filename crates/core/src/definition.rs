//! Approval chain definitions: the per-tenant, per-workflow template a
//! chain instance is snapshotted from. Definitions are owned by tenant
//! settings and edited elsewhere; the engine only reads them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::role::{Role, TenantId, WorkflowKind};
use crate::errors::WorkflowError;
use crate::escalation::DayConvention;
use crate::store::StoreError;

/// One step template: the role required at this position, plus roles
/// empowered to act when the primary is absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub position: u32,
    pub required_role: Role,
    pub fallback_roles: Vec<Role>,
}

impl StepTemplate {
    pub fn new(position: u32, required_role: Role, fallback_roles: Vec<Role>) -> Self {
        // The primary never needs to appear in its own fallback set.
        let fallback_roles =
            fallback_roles.into_iter().filter(|role| *role != required_role).collect();
        Self { position, required_role, fallback_roles }
    }
}

/// The active approval chain configuration for one workflow type of one
/// tenant. Instantiation copies everything by value; in-flight chains are
/// never affected by later edits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub workflow: WorkflowKind,
    pub tenant_id: TenantId,
    pub version: u32,
    pub multi_level: bool,
    /// 0 disables the escalation timer.
    pub auto_approve_after_days: u32,
    pub day_convention: DayConvention,
    pub steps: Vec<StepTemplate>,
}

impl ChainDefinition {
    /// Rejects definitions a chain must never be started from. Malformed
    /// configuration blocks entity submission rather than defaulting.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::Configuration(format!(
                "definition for {}/{} has no steps",
                self.tenant_id.0, self.workflow
            )));
        }
        if !self.multi_level && self.steps.len() != 1 {
            return Err(WorkflowError::Configuration(format!(
                "single-level definition for {}/{} has {} steps",
                self.tenant_id.0,
                self.workflow,
                self.steps.len()
            )));
        }
        let mut positions: Vec<u32> = self.steps.iter().map(|step| step.position).collect();
        positions.sort_unstable();
        positions.dedup();
        if positions.len() != self.steps.len() {
            return Err(WorkflowError::Configuration(format!(
                "definition for {}/{} repeats a step position",
                self.tenant_id.0, self.workflow
            )));
        }
        let contiguous = positions.iter().enumerate().all(|(i, p)| *p == i as u32 + 1);
        if !contiguous {
            return Err(WorkflowError::Configuration(format!(
                "definition for {}/{} has non-contiguous step positions {positions:?}",
                self.tenant_id.0, self.workflow
            )));
        }
        Ok(())
    }

    /// Steps ordered by position.
    #[must_use]
    pub fn ordered_steps(&self) -> Vec<StepTemplate> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|step| step.position);
        steps
    }
}

/// Read-only access to the settings store holding chain definitions.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// The active definition for a workflow type and tenant, or `None` if
    /// the tenant never configured one.
    async fn resolve(
        &self,
        workflow: WorkflowKind,
        tenant_id: &TenantId,
    ) -> Result<Option<ChainDefinition>, StoreError>;
}

/// Fixed in-memory definition set, used in tests and by embedded callers.
#[derive(Clone, Debug, Default)]
pub struct StaticDefinitionSource {
    definitions: HashMap<(WorkflowKind, String), ChainDefinition>,
}

impl StaticDefinitionSource {
    pub fn new(definitions: Vec<ChainDefinition>) -> Self {
        let definitions = definitions
            .into_iter()
            .map(|def| ((def.workflow, def.tenant_id.0.clone()), def))
            .collect();
        Self { definitions }
    }
}

#[async_trait]
impl DefinitionSource for StaticDefinitionSource {
    async fn resolve(
        &self,
        workflow: WorkflowKind,
        tenant_id: &TenantId,
    ) -> Result<Option<ChainDefinition>, StoreError> {
        Ok(self.definitions.get(&(workflow, tenant_id.0.clone())).cloned())
    }
}
