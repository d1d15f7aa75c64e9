use serde::{Deserialize, Serialize};

/// A human role that can be bound to an approval step.
///
/// The set is closed: unknown role strings fail to parse and therefore
/// never qualify for anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    TeamLead,
    Manager,
    HrManager,
    FinanceManager,
    SuperAdmin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Self::Employee),
            "team_lead" => Some(Self::TeamLead),
            "manager" => Some(Self::Manager),
            "hr_manager" => Some(Self::HrManager),
            "finance_manager" => Some(Self::FinanceManager),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::TeamLead => "team_lead",
            Self::Manager => "manager",
            Self::HrManager => "hr_manager",
            Self::FinanceManager => "finance_manager",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of business object a chain reviews.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Expense,
    Leave,
    SalaryAdvance,
}

impl WorkflowKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "expense" => Some(Self::Expense),
            "leave" => Some(Self::Leave),
            "salary_advance" => Some(Self::SalaryAdvance),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Leave => "leave",
            Self::SalaryAdvance => "salary_advance",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

/// An authenticated human actor as resolved by the caller's session layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: ActorId(id.into()), role }
    }
}

/// Actor id recorded when the escalation timer resolves a step.
pub const SYSTEM_ACTOR_ID: &str = "system";
