use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use depot_core::domain::action::{Action, ActionId, ActionStatus, ConversationId};
use depot_core::domain::tenant::{TenantId, UserId};
use depot_core::idempotency::IdempotencyKey;

use crate::store::StoreError;
use crate::DbPool;

/// Persistence for action records. Every query carries the tenant id, so
/// a cross-tenant action id behaves exactly like a missing one.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert a new action. When another action with the same
    /// (tenant, idempotency key) already exists, the insert is a no-op and
    /// the existing action is returned instead of a duplicate row.
    async fn insert(&self, action: Action) -> Result<Action, StoreError>;

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
    ) -> Result<Option<Action>, StoreError>;

    /// The exactly-once boundary: a compare-and-swap on the current
    /// status. Returns `false` when the action already left `Proposed`
    /// (or does not exist for this tenant); the caller maps that to a
    /// conflict. Never implemented as read-then-write.
    async fn transition_from_proposed(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
        to: ActionStatus,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Finalize a confirmed action with its execution outcome. Conditional
    /// on the row still being `Confirmed`.
    async fn record_outcome(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
        to: ActionStatus,
        result_json: Option<String>,
        error: Option<String>,
        executed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn list_for_conversation(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Action>, StoreError>;
}

pub struct SqlActionStore {
    pool: DbPool,
}

impl SqlActionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<Action>, StoreError> {
        let row = sqlx::query(
            "SELECT id, conversation_id, tenant_id, user_id, capability_name, arguments_json,
                    result_json, error, idempotency_key, status, confirmed_at, executed_at,
                    created_at, updated_at
             FROM action
             WHERE tenant_id = ? AND idempotency_key = ?",
        )
        .bind(tenant_id.as_str())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(action_from_row).transpose()
    }
}

#[async_trait]
impl ActionStore for SqlActionStore {
    async fn insert(&self, action: Action) -> Result<Action, StoreError> {
        let result = sqlx::query(
            "INSERT INTO action (
                id, conversation_id, tenant_id, user_id, capability_name, arguments_json,
                result_json, error, idempotency_key, status, confirmed_at, executed_at,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, idempotency_key) DO NOTHING",
        )
        .bind(&action.id.0)
        .bind(&action.conversation_id.0)
        .bind(action.tenant_id.as_str())
        .bind(&action.user_id.0)
        .bind(&action.capability_name)
        .bind(&action.arguments_json)
        .bind(action.result_json.as_deref())
        .bind(action.error.as_deref())
        .bind(action.idempotency_key.as_str())
        .bind(action.status.as_str())
        .bind(action.confirmed_at.map(|value| value.to_rfc3339()))
        .bind(action.executed_at.map(|value| value.to_rfc3339()))
        .bind(action.created_at.to_rfc3339())
        .bind(action.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(action);
        }

        // Duplicate proposal: hand back the action that already owns the key.
        self.find_by_idempotency_key(&action.tenant_id, &action.idempotency_key)
            .await?
            .ok_or_else(|| {
                StoreError::Decode(format!(
                    "idempotency conflict for key `{}` but no existing action found",
                    action.idempotency_key.as_str()
                ))
            })
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
    ) -> Result<Option<Action>, StoreError> {
        let row = sqlx::query(
            "SELECT id, conversation_id, tenant_id, user_id, capability_name, arguments_json,
                    result_json, error, idempotency_key, status, confirmed_at, executed_at,
                    created_at, updated_at
             FROM action
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(&id.0)
        .bind(tenant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(action_from_row).transpose()
    }

    async fn transition_from_proposed(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
        to: ActionStatus,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE action
             SET status = ?, confirmed_at = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ? AND status = 'proposed'",
        )
        .bind(to.as_str())
        .bind(decided_at.to_rfc3339())
        .bind(decided_at.to_rfc3339())
        .bind(&id.0)
        .bind(tenant_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_outcome(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
        to: ActionStatus,
        result_json: Option<String>,
        error: Option<String>,
        executed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE action
             SET status = ?, result_json = ?, error = ?, executed_at = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ? AND status = 'confirmed'",
        )
        .bind(to.as_str())
        .bind(result_json.as_deref())
        .bind(error.as_deref())
        .bind(executed_at.to_rfc3339())
        .bind(executed_at.to_rfc3339())
        .bind(&id.0)
        .bind(tenant_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_conversation(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Action>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, tenant_id, user_id, capability_name, arguments_json,
                    result_json, error, idempotency_key, status, confirmed_at, executed_at,
                    created_at, updated_at
             FROM action
             WHERE tenant_id = ? AND conversation_id = ?
             ORDER BY created_at ASC",
        )
        .bind(tenant_id.as_str())
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(action_from_row).collect()
    }
}

fn action_from_row(row: SqliteRow) -> Result<Action, StoreError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ActionStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Decode(format!("unknown action status `{status_raw}`")))?;

    let tenant_raw = row.try_get::<String, _>("tenant_id")?;
    let tenant_id = TenantId::new(tenant_raw)
        .map_err(|error| StoreError::Decode(format!("invalid tenant id: {error}")))?;

    Ok(Action {
        id: ActionId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        tenant_id,
        user_id: UserId(row.try_get("user_id")?),
        capability_name: row.try_get("capability_name")?,
        arguments_json: row.try_get("arguments_json")?,
        result_json: row.try_get("result_json")?,
        error: row.try_get("error")?,
        idempotency_key: IdempotencyKey(row.try_get("idempotency_key")?),
        status,
        confirmed_at: parse_optional_timestamp("confirmed_at", row.try_get("confirmed_at")?)?,
        executed_at: parse_optional_timestamp("executed_at", row.try_get("executed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| StoreError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})")),
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
