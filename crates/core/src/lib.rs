pub mod config;
pub mod definition;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod escalation;
pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod store;

pub use definition::{ChainDefinition, DefinitionSource, StaticDefinitionSource, StepTemplate};
pub use domain::chain::{
    ChainId, ChainInstance, ChainStatus, EntityRef, StepInstance, StepStatus,
};
pub use domain::decision::{
    Decision, DecisionAction, DecisionRecord, DecisionRecordId,
};
pub use domain::role::{Actor, ActorId, Role, TenantId, WorkflowKind, SYSTEM_ACTOR_ID};
pub use engine::{ChainEngine, TransitionOutcome};
pub use errors::WorkflowError;
pub use escalation::DayConvention;
pub use events::{
    ChainStatusChanged, NoopHooks, NotificationEvent, NotificationHook, RecordingHooks,
    StatusListener,
};
pub use orchestrator::{Orchestrator, SweepOutcome, Verdict};
pub use store::{AuditTrail, ChainStore, InMemoryChainStore, StoreError};
