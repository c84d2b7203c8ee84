use async_trait::async_trait;

use depot_core::audit::AuditEntry;

use crate::store::StoreError;
use crate::DbPool;

/// Write-only audit persistence. No read, update, or delete path is
/// exposed; history is append-only by construction. Callers treat the
/// write as best-effort and must not fail their primary operation on an
/// audit error.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError>;
}

pub struct SqlAuditStore {
    pool: DbPool,
}

impl SqlAuditStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for SqlAuditStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_entry (
                id, tenant_id, user_id, entity_kind, entity_id, verb, payload,
                source, reason, occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(entry.tenant_id.as_str())
        .bind(entry.user_id.as_ref().map(|user| user.0.as_str()))
        .bind(entry.entity_kind.as_str())
        .bind(&entry.entity_id.0)
        .bind(entry.verb.as_str())
        .bind(entry.payload.to_string())
        .bind(entry.source.as_deref())
        .bind(entry.reason.as_deref())
        .bind(entry.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
