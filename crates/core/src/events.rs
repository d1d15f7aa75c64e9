//! Outbound seams: terminal status events for the entity owner and
//! notification hooks for approvers. Delivery (email, SMS, in-app) is
//! entirely the collaborator's concern; the engine only invokes the
//! interfaces.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::chain::{ChainId, ChainStatus, EntityRef};
use crate::domain::decision::DecisionAction;
use crate::domain::role::Role;

/// Emitted once when a chain reaches a terminal status, so the owner of
/// the approvable entity can update its own status field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainStatusChanged {
    pub chain_id: ChainId,
    pub entity: EntityRef,
    pub status: ChainStatus,
}

#[async_trait]
pub trait StatusListener: Send + Sync {
    async fn chain_status_changed(&self, event: ChainStatusChanged);
}

/// What an approver is being told about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationEvent {
    /// The step at `position` is now awaiting this role's decision.
    StepActivated { position: u32 },
    /// A decision landed on the step at `position`.
    DecisionRecorded { position: u32, action: DecisionAction },
}

#[async_trait]
pub trait NotificationHook: Send + Sync {
    async fn notify_actor(&self, role: Role, entity: &EntityRef, event: NotificationEvent);
}

/// Hook implementations for callers that do not wire notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl StatusListener for NoopHooks {
    async fn chain_status_changed(&self, _event: ChainStatusChanged) {}
}

#[async_trait]
impl NotificationHook for NoopHooks {
    async fn notify_actor(&self, _role: Role, _entity: &EntityRef, _event: NotificationEvent) {}
}

/// Test fake recording every emission.
#[derive(Clone, Default)]
pub struct RecordingHooks {
    status_events: Arc<Mutex<Vec<ChainStatusChanged>>>,
    notifications: Arc<Mutex<Vec<(Role, EntityRef, NotificationEvent)>>>,
}

impl RecordingHooks {
    pub fn status_events(&self) -> Vec<ChainStatusChanged> {
        match self.status_events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn notifications(&self) -> Vec<(Role, EntityRef, NotificationEvent)> {
        match self.notifications.lock() {
            Ok(notifications) => notifications.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl StatusListener for RecordingHooks {
    async fn chain_status_changed(&self, event: ChainStatusChanged) {
        match self.status_events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[async_trait]
impl NotificationHook for RecordingHooks {
    async fn notify_actor(&self, role: Role, entity: &EntityRef, event: NotificationEvent) {
        let entry = (role, entity.clone(), event);
        match self.notifications.lock() {
            Ok(mut notifications) => notifications.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
