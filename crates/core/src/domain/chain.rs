use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::role::{ActorId, Role, TenantId, WorkflowKind};
use crate::escalation::DayConvention;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub String);

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the approvable business object under review. The engine
/// never touches that object's storage; it only carries the reference back
/// out through status events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub workflow: WorkflowKind,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(workflow: WorkflowKind, entity_id: impl Into<String>) -> Self {
        Self { workflow, entity_id: entity_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl StepStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    InProgress,
    Approved,
    Rejected,
    Cancelled,
}

impl ChainStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Runtime state of one approval step. Template fields (`position`,
/// `required_role`, `fallback_roles`) are copied from the definition at
/// instantiation time and never change afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInstance {
    pub position: u32,
    pub required_role: Role,
    pub fallback_roles: Vec<Role>,
    pub status: StepStatus,
    pub decided_by: Option<ActorId>,
    pub decided_as_fallback: bool,
    pub remarks: Option<String>,
    /// Set when a human decided the step. Mutually exclusive with
    /// `auto_resolved_at`.
    pub decided_at: Option<DateTime<Utc>>,
    /// Set when the escalation timer resolved the step.
    pub auto_resolved_at: Option<DateTime<Utc>>,
    /// When this step became the current one; drives the escalation
    /// deadline. Only the first step has it set at creation.
    pub activated_at: Option<DateTime<Utc>>,
}

/// One approval chain bound to one approvable entity. The definition is
/// snapshotted into `auto_approve_after_days`, `day_convention` and the
/// step list, so later definition edits never alter an in-flight chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInstance {
    pub id: ChainId,
    pub tenant_id: TenantId,
    pub entity: EntityRef,
    pub definition_version: u32,
    pub auto_approve_after_days: u32,
    pub day_convention: DayConvention,
    pub status: ChainStatus,
    pub steps: Vec<StepInstance>,
    /// Optimistic-concurrency version; bumped on every committed transition.
    pub state_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainInstance {
    /// The single step that currently accepts decisions: the first
    /// `pending` step, and only while the chain is in progress. Derived
    /// view over an invariant enforced at write time.
    #[must_use]
    pub fn current_step(&self) -> Option<&StepInstance> {
        if self.status != ChainStatus::InProgress {
            return None;
        }
        self.steps.iter().find(|step| step.status == StepStatus::Pending)
    }

    #[must_use]
    pub fn step_at(&self, position: u32) -> Option<&StepInstance> {
        self.steps.iter().find(|step| step.position == position)
    }
}
