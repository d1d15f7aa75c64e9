//! Role qualification for approval steps.
//!
//! Pure functions over a step's snapshotted template fields. Unknown or
//! unrelated roles simply fail qualification; there is no error path.

use crate::domain::chain::StepInstance;
use crate::domain::role::Role;

/// How an actor qualifies for a step, if at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Qualification {
    /// Holds the step's required role.
    Primary,
    /// Holds one of the step's fallback roles.
    Fallback,
}

/// Whether `role` may decide `step`, and in which capacity.
#[must_use]
pub fn qualify(role: Role, step: &StepInstance) -> Option<Qualification> {
    if role == step.required_role {
        Some(Qualification::Primary)
    } else if step.fallback_roles.contains(&role) {
        Some(Qualification::Fallback)
    } else {
        None
    }
}

#[must_use]
pub fn is_qualified(role: Role, step: &StepInstance) -> bool {
    qualify(role, step).is_some()
}

#[must_use]
pub fn is_fallback_actor(role: Role, step: &StepInstance) -> bool {
    matches!(qualify(role, step), Some(Qualification::Fallback))
}
