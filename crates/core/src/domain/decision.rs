use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chain::ChainId;
use crate::domain::role::{Actor, ActorId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionRecordId(pub String);

/// What happened to a step, as recorded in the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approved,
    Rejected,
    AutoApproved,
    Cancelled,
}

impl DecisionAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "auto_approved" => Some(Self::AutoApproved),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoApproved => "auto_approved",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Immutable audit entry. Appended once per state-changing operation and
/// never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: DecisionRecordId,
    pub chain_id: ChainId,
    pub step_position: u32,
    pub actor_id: ActorId,
    /// Role string as recorded at decision time; `"system"` for
    /// auto-resolutions.
    pub actor_role: String,
    pub action: DecisionAction,
    pub remarks: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A human verdict on the current step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
}

/// A transition requested against a chain's current step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve { actor: Actor, remarks: Option<String> },
    Reject { actor: Actor, remarks: Option<String> },
    /// Issued by the escalation sweep; bypasses role qualification.
    AutoApprove,
    /// Withdrawal of the underlying entity.
    Cancel { actor_id: ActorId },
}

#[cfg(test)]
mod tests {
    use super::DecisionAction;

    #[test]
    fn action_strings_round_trip() {
        for action in [
            DecisionAction::Approved,
            DecisionAction::Rejected,
            DecisionAction::AutoApproved,
            DecisionAction::Cancelled,
        ] {
            assert_eq!(DecisionAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(DecisionAction::parse("escalated"), None);
    }
}
