use thiserror::Error;

use crate::domain::chain::{ChainId, ChainStatus};
use crate::domain::role::Role;

/// Everything that can go wrong inside the approval engine.
///
/// Qualification and staleness failures are recoverable caller errors with
/// actionable user messages; configuration and storage failures are opaque
/// to end users and logged for operators.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("role `{actor_role}` is not an approver for step {position} (requires `{required_role}`)")]
    UnauthorizedActor { actor_role: Role, required_role: Role, position: u32 },
    #[error("step {position} of chain {chain_id} is no longer open for decisions")]
    StaleStep { chain_id: ChainId, position: u32 },
    #[error("chain {chain_id} is {status:?} and does not accept `{attempted}`")]
    InvalidTransition { chain_id: ChainId, status: ChainStatus, attempted: &'static str },
    #[error("approval chain not found: {0}")]
    ChainNotFound(ChainId),
    #[error("chain {0} has no step awaiting a decision")]
    NoCurrentStep(ChainId),
    #[error("approval configuration invalid: {0}")]
    Configuration(String),
    #[error("approval storage failure: {0}")]
    Storage(String),
}

impl WorkflowError {
    /// Message safe to surface to the requesting user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::UnauthorizedActor { required_role, .. } => {
                format!("This request is awaiting approval by {required_role}.")
            }
            Self::StaleStep { .. } | Self::InvalidTransition { .. } | Self::NoCurrentStep(_) => {
                "This request was already decided.".to_string()
            }
            Self::ChainNotFound(_) => "Approval request not found.".to_string(),
            Self::Configuration(_) | Self::Storage(_) => {
                "The approval could not be processed. Please try again later.".to_string()
            }
        }
    }

    /// Whether the caller should treat this as a conflict and refresh its
    /// view, rather than as a bad request or a server fault.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StaleStep { .. } | Self::InvalidTransition { .. } | Self::NoCurrentStep(_)
        )
    }
}
