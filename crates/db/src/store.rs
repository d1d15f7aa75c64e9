//! SQLite-backed chain store, audit trail and definition source.
//!
//! `commit_transition` is the concurrency seam: the chain update, the step
//! updates and the audit append run in one transaction, and the chain
//! update carries the optimistic `state_version` check. Racing callers
//! that lose the check leave nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use countersign_core::definition::{ChainDefinition, DefinitionSource, StepTemplate};
use countersign_core::domain::chain::{
    ChainId, ChainInstance, ChainStatus, EntityRef, StepInstance, StepStatus,
};
use countersign_core::domain::decision::{DecisionAction, DecisionRecord, DecisionRecordId};
use countersign_core::domain::role::{ActorId, Role, TenantId, WorkflowKind};
use countersign_core::escalation::DayConvention;
use countersign_core::store::{AuditTrail, ChainStore, StoreError};

use crate::DbPool;

pub struct SqlChainStore {
    pool: DbPool,
}

impl SqlChainStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, chain_id: &str) -> Result<Vec<StepInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT position, required_role, fallback_roles, status, decided_by,
                    decided_as_fallback, remarks, decided_at, auto_resolved_at, activated_at
             FROM approval_step WHERE chain_id = ? ORDER BY position ASC",
        )
        .bind(chain_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_step).collect()
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn decode_error(message: impl Into<String>) -> StoreError {
    StoreError::Decode(message.into())
}

fn decode_u32(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| decode_error(format!("{column}: value {value} out of range")))
}

fn decode_u64(value: i64, column: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| decode_error(format!("{column}: value {value} out of range")))
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(format!("{column}: {e}")))
}

fn parse_optional_timestamp(
    raw: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| parse_timestamp(&s, column)).transpose()
}

fn parse_role(raw: &str) -> Result<Role, StoreError> {
    Role::parse(raw).ok_or_else(|| decode_error(format!("unknown role: {raw}")))
}

fn parse_fallback_roles(json: &str) -> Result<Vec<Role>, StoreError> {
    let raw: Vec<String> = serde_json::from_str(json)
        .map_err(|e| decode_error(format!("fallback_roles: {e}")))?;
    raw.iter().map(|role| parse_role(role)).collect()
}

fn fallback_roles_to_json(roles: &[Role]) -> String {
    let raw: Vec<&str> = roles.iter().map(Role::as_str).collect();
    // Serializing a list of static strings cannot fail.
    serde_json::to_string(&raw).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<StepInstance, StoreError> {
    let position: i64 =
        row.try_get("position").map_err(|e| decode_error(e.to_string()))?;
    let required_role: String =
        row.try_get("required_role").map_err(|e| decode_error(e.to_string()))?;
    let fallback_roles: String =
        row.try_get("fallback_roles").map_err(|e| decode_error(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| decode_error(e.to_string()))?;
    let decided_by: Option<String> =
        row.try_get("decided_by").map_err(|e| decode_error(e.to_string()))?;
    let decided_as_fallback: i64 =
        row.try_get("decided_as_fallback").map_err(|e| decode_error(e.to_string()))?;
    let remarks: Option<String> =
        row.try_get("remarks").map_err(|e| decode_error(e.to_string()))?;
    let decided_at: Option<String> =
        row.try_get("decided_at").map_err(|e| decode_error(e.to_string()))?;
    let auto_resolved_at: Option<String> =
        row.try_get("auto_resolved_at").map_err(|e| decode_error(e.to_string()))?;
    let activated_at: Option<String> =
        row.try_get("activated_at").map_err(|e| decode_error(e.to_string()))?;

    Ok(StepInstance {
        position: decode_u32(position, "position")?,
        required_role: parse_role(&required_role)?,
        fallback_roles: parse_fallback_roles(&fallback_roles)?,
        status: StepStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown step status: {status}")))?,
        decided_by: decided_by.map(ActorId),
        decided_as_fallback: decided_as_fallback != 0,
        remarks,
        decided_at: parse_optional_timestamp(decided_at, "decided_at")?,
        auto_resolved_at: parse_optional_timestamp(auto_resolved_at, "auto_resolved_at")?,
        activated_at: parse_optional_timestamp(activated_at, "activated_at")?,
    })
}

fn row_to_chain(
    row: &sqlx::sqlite::SqliteRow,
    steps: Vec<StepInstance>,
) -> Result<ChainInstance, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_error(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| decode_error(e.to_string()))?;
    let workflow: String =
        row.try_get("workflow").map_err(|e| decode_error(e.to_string()))?;
    let entity_id: String =
        row.try_get("entity_id").map_err(|e| decode_error(e.to_string()))?;
    let definition_version: i64 =
        row.try_get("definition_version").map_err(|e| decode_error(e.to_string()))?;
    let auto_approve_after_days: i64 =
        row.try_get("auto_approve_after_days").map_err(|e| decode_error(e.to_string()))?;
    let day_convention: String =
        row.try_get("day_convention").map_err(|e| decode_error(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| decode_error(e.to_string()))?;
    let state_version: i64 =
        row.try_get("state_version").map_err(|e| decode_error(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| decode_error(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| decode_error(e.to_string()))?;

    let workflow = WorkflowKind::parse(&workflow)
        .ok_or_else(|| decode_error(format!("unknown workflow kind: {workflow}")))?;

    Ok(ChainInstance {
        id: ChainId(id),
        tenant_id: TenantId(tenant_id),
        entity: EntityRef::new(workflow, entity_id),
        definition_version: decode_u32(definition_version, "definition_version")?,
        auto_approve_after_days: decode_u32(auto_approve_after_days, "auto_approve_after_days")?,
        day_convention: DayConvention::parse(&day_convention)
            .ok_or_else(|| decode_error(format!("unknown day convention: {day_convention}")))?,
        status: ChainStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown chain status: {status}")))?,
        steps,
        state_version: decode_u64(state_version, "state_version")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DecisionRecord, StoreError> {
    let id: String = row.try_get("id").map_err(|e| decode_error(e.to_string()))?;
    let chain_id: String =
        row.try_get("chain_id").map_err(|e| decode_error(e.to_string()))?;
    let step_position: i64 =
        row.try_get("step_position").map_err(|e| decode_error(e.to_string()))?;
    let actor_id: String =
        row.try_get("actor_id").map_err(|e| decode_error(e.to_string()))?;
    let actor_role: String =
        row.try_get("actor_role").map_err(|e| decode_error(e.to_string()))?;
    let action: String = row.try_get("action").map_err(|e| decode_error(e.to_string()))?;
    let remarks: Option<String> =
        row.try_get("remarks").map_err(|e| decode_error(e.to_string()))?;
    let recorded_at: String =
        row.try_get("recorded_at").map_err(|e| decode_error(e.to_string()))?;

    Ok(DecisionRecord {
        id: DecisionRecordId(id),
        chain_id: ChainId(chain_id),
        step_position: decode_u32(step_position, "step_position")?,
        actor_id: ActorId(actor_id),
        actor_role,
        action: DecisionAction::parse(&action)
            .ok_or_else(|| decode_error(format!("unknown decision action: {action}")))?,
        remarks,
        recorded_at: parse_timestamp(&recorded_at, "recorded_at")?,
    })
}

#[async_trait]
impl ChainStore for SqlChainStore {
    async fn insert(&self, chain: &ChainInstance) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let inserted = sqlx::query(
            "INSERT INTO approval_chain (id, tenant_id, workflow, entity_id,
                                         definition_version, auto_approve_after_days,
                                         day_convention, status, state_version,
                                         created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&chain.id.0)
        .bind(&chain.tenant_id.0)
        .bind(chain.entity.workflow.as_str())
        .bind(&chain.entity.entity_id)
        .bind(i64::from(chain.definition_version))
        .bind(i64::from(chain.auto_approve_after_days))
        .bind(chain.day_convention.as_str())
        .bind(chain.status.as_str())
        .bind(chain.state_version as i64)
        .bind(chain.created_at.to_rfc3339())
        .bind(chain.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Err(StoreError::DuplicateChain(chain.id.clone()));
        }

        for step in &chain.steps {
            sqlx::query(
                "INSERT INTO approval_step (chain_id, position, required_role, fallback_roles,
                                            status, decided_by, decided_as_fallback, remarks,
                                            decided_at, auto_resolved_at, activated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chain.id.0)
            .bind(i64::from(step.position))
            .bind(step.required_role.as_str())
            .bind(fallback_roles_to_json(&step.fallback_roles))
            .bind(step.status.as_str())
            .bind(step.decided_by.as_ref().map(|actor| actor.0.clone()))
            .bind(i64::from(step.decided_as_fallback))
            .bind(&step.remarks)
            .bind(step.decided_at.map(|dt| dt.to_rfc3339()))
            .bind(step.auto_resolved_at.map(|dt| dt.to_rfc3339()))
            .bind(step.activated_at.map(|dt| dt.to_rfc3339()))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)
    }

    async fn find(&self, id: &ChainId) -> Result<Option<ChainInstance>, StoreError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, workflow, entity_id, definition_version,
                    auto_approve_after_days, day_convention, status, state_version,
                    created_at, updated_at
             FROM approval_chain WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else { return Ok(None) };
        let steps = self.load_steps(&id.0).await?;
        Ok(Some(row_to_chain(&row, steps)?))
    }

    async fn commit_transition(
        &self,
        chain: &ChainInstance,
        expected_version: u64,
        record: &DecisionRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let updated = sqlx::query(
            "UPDATE approval_chain
             SET status = ?, state_version = ?, updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(chain.status.as_str())
        .bind(chain.state_version as i64)
        .bind(chain.updated_at.to_rfc3339())
        .bind(&chain.id.0)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Err(StoreError::VersionConflict {
                chain_id: chain.id.clone(),
                expected: expected_version,
            });
        }

        for step in &chain.steps {
            sqlx::query(
                "UPDATE approval_step
                 SET status = ?, decided_by = ?, decided_as_fallback = ?, remarks = ?,
                     decided_at = ?, auto_resolved_at = ?, activated_at = ?
                 WHERE chain_id = ? AND position = ?",
            )
            .bind(step.status.as_str())
            .bind(step.decided_by.as_ref().map(|actor| actor.0.clone()))
            .bind(i64::from(step.decided_as_fallback))
            .bind(&step.remarks)
            .bind(step.decided_at.map(|dt| dt.to_rfc3339()))
            .bind(step.auto_resolved_at.map(|dt| dt.to_rfc3339()))
            .bind(step.activated_at.map(|dt| dt.to_rfc3339()))
            .bind(&chain.id.0)
            .bind(i64::from(step.position))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        sqlx::query(
            "INSERT INTO decision_record (id, chain_id, step_position, actor_id, actor_role,
                                          action, remarks, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.chain_id.0)
        .bind(i64::from(record.step_position))
        .bind(&record.actor_id.0)
        .bind(&record.actor_role)
        .bind(record.action.as_str())
        .bind(&record.remarks)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    async fn list_escalation_candidates(&self) -> Result<Vec<ChainInstance>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, workflow, entity_id, definition_version,
                    auto_approve_after_days, day_convention, status, state_version,
                    created_at, updated_at
             FROM approval_chain
             WHERE status = 'in_progress' AND auto_approve_after_days > 0
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut chains = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(|e| decode_error(e.to_string()))?;
            let steps = self.load_steps(&id).await?;
            chains.push(row_to_chain(row, steps)?);
        }
        Ok(chains)
    }
}

#[async_trait]
impl AuditTrail for SqlChainStore {
    async fn list_for(&self, chain_id: &ChainId) -> Result<Vec<DecisionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, chain_id, step_position, actor_id, actor_role, action,
                    remarks, recorded_at
             FROM decision_record
             WHERE chain_id = ?
             ORDER BY recorded_at ASC, rowid ASC",
        )
        .bind(&chain_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_record).collect()
    }
}

/// Reads the active per-tenant chain configuration from the settings
/// tables. `save` replaces a tenant's configuration wholesale; in-flight
/// chains keep their snapshot either way.
pub struct SqlDefinitionSource {
    pool: DbPool,
}

impl SqlDefinitionSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, definition: &ChainDefinition) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            "INSERT INTO workflow_definition (tenant_id, workflow, version, multi_level,
                                              auto_approve_after_days, day_convention)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, workflow) DO UPDATE SET
                 version = excluded.version,
                 multi_level = excluded.multi_level,
                 auto_approve_after_days = excluded.auto_approve_after_days,
                 day_convention = excluded.day_convention",
        )
        .bind(&definition.tenant_id.0)
        .bind(definition.workflow.as_str())
        .bind(i64::from(definition.version))
        .bind(i64::from(definition.multi_level))
        .bind(i64::from(definition.auto_approve_after_days))
        .bind(definition.day_convention.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query("DELETE FROM workflow_definition_step WHERE tenant_id = ? AND workflow = ?")
            .bind(&definition.tenant_id.0)
            .bind(definition.workflow.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        for step in &definition.steps {
            sqlx::query(
                "INSERT INTO workflow_definition_step (tenant_id, workflow, position,
                                                       required_role, fallback_roles)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&definition.tenant_id.0)
            .bind(definition.workflow.as_str())
            .bind(i64::from(step.position))
            .bind(step.required_role.as_str())
            .bind(fallback_roles_to_json(&step.fallback_roles))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)
    }
}

#[async_trait]
impl DefinitionSource for SqlDefinitionSource {
    async fn resolve(
        &self,
        workflow: WorkflowKind,
        tenant_id: &TenantId,
    ) -> Result<Option<ChainDefinition>, StoreError> {
        let row = sqlx::query(
            "SELECT version, multi_level, auto_approve_after_days, day_convention
             FROM workflow_definition WHERE tenant_id = ? AND workflow = ?",
        )
        .bind(&tenant_id.0)
        .bind(workflow.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else { return Ok(None) };

        let version: i64 =
            row.try_get("version").map_err(|e| decode_error(e.to_string()))?;
        let multi_level: i64 =
            row.try_get("multi_level").map_err(|e| decode_error(e.to_string()))?;
        let auto_approve_after_days: i64 = row
            .try_get("auto_approve_after_days")
            .map_err(|e| decode_error(e.to_string()))?;
        let day_convention: String =
            row.try_get("day_convention").map_err(|e| decode_error(e.to_string()))?;

        let step_rows = sqlx::query(
            "SELECT position, required_role, fallback_roles
             FROM workflow_definition_step
             WHERE tenant_id = ? AND workflow = ?
             ORDER BY position ASC",
        )
        .bind(&tenant_id.0)
        .bind(workflow.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut steps = Vec::with_capacity(step_rows.len());
        for step_row in &step_rows {
            let position: i64 =
                step_row.try_get("position").map_err(|e| decode_error(e.to_string()))?;
            let required_role: String =
                step_row.try_get("required_role").map_err(|e| decode_error(e.to_string()))?;
            let fallback_roles: String =
                step_row.try_get("fallback_roles").map_err(|e| decode_error(e.to_string()))?;
            steps.push(StepTemplate {
                position: decode_u32(position, "position")?,
                required_role: parse_role(&required_role)?,
                fallback_roles: parse_fallback_roles(&fallback_roles)?,
            });
        }

        Ok(Some(ChainDefinition {
            workflow,
            tenant_id: tenant_id.clone(),
            version: decode_u32(version, "version")?,
            multi_level: multi_level != 0,
            auto_approve_after_days: decode_u32(auto_approve_after_days, "auto_approve_after_days")?,
            day_convention: DayConvention::parse(&day_convention)
                .ok_or_else(|| decode_error(format!("unknown day convention: {day_convention}")))?,
            steps,
        }))
    }
}
