use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entity::{EntityId, EntityKind};
use crate::domain::tenant::{TenantId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditVerb {
    Create,
    Update,
    Delete,
    Execute,
    Confirm,
    Cancel,
}

impl AuditVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Execute => "execute",
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "execute" => Some(Self::Execute),
            "confirm" => Some(Self::Confirm),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// One immutable line in the tenant-scoped audit trail. Created once,
/// never mutated or deleted; the store layer exposes only an append path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub tenant_id: TenantId,
    /// Absent for system-originated changes (migrations, reconciliation).
    pub user_id: Option<UserId>,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub verb: AuditVerb,
    pub payload: serde_json::Value,
    pub source: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: TenantId,
        user_id: Option<UserId>,
        entity_kind: EntityKind,
        entity_id: EntityId,
        verb: AuditVerb,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            user_id,
            entity_kind,
            entity_id,
            verb,
            payload,
            source: None,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AuditEntry, AuditVerb};
    use crate::domain::entity::{EntityId, EntityKind};
    use crate::domain::tenant::{TenantId, UserId};

    #[test]
    fn verb_round_trips_from_storage_encoding() {
        let cases = [
            AuditVerb::Create,
            AuditVerb::Update,
            AuditVerb::Delete,
            AuditVerb::Execute,
            AuditVerb::Confirm,
            AuditVerb::Cancel,
        ];

        for verb in cases {
            assert_eq!(AuditVerb::parse(verb.as_str()), Some(verb));
        }
    }

    #[test]
    fn builder_attaches_source_and_reason() {
        let entry = AuditEntry::new(
            TenantId::new("T-1").expect("tenant id"),
            Some(UserId("U-1".to_string())),
            EntityKind::Order,
            EntityId("ord-1".to_string()),
            AuditVerb::Create,
            json!({"customer_id": "C-9"}),
        )
        .with_source("agent")
        .with_reason("confirmed action act-1");

        assert_eq!(entry.source.as_deref(), Some("agent"));
        assert_eq!(entry.reason.as_deref(), Some("confirmed action act-1"));
        assert!(!entry.id.is_empty());
    }
}
