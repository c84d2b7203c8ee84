use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use depot_core::audit::AuditEntry;
use depot_core::domain::action::{Action, ActionId, ActionStatus, ConversationId};
use depot_core::domain::entity::{EntityId, EntityKind, EntityRecord, Filter, NewEntity, Patch};
use depot_core::domain::tenant::TenantId;

use crate::actions::ActionStore;
use crate::audit::AuditStore;
use crate::store::{EntityStore, StoreError};

fn lock_poisoned() -> StoreError {
    StoreError::Decode("in-memory store lock poisoned".to_string())
}

fn matches(record: &EntityRecord, filter: &Filter) -> bool {
    if let Some(id) = &filter.id {
        if &record.id != id {
            return false;
        }
    }

    if let Some(tenant_id) = &filter.tenant_id {
        if record.tenant_id.as_ref() != Some(tenant_id) {
            return false;
        }
    }

    filter.fields.iter().all(|(name, value)| record.payload.get(name) == Some(value))
}

fn apply_patch(record: &mut EntityRecord, patch: &Patch, now: DateTime<Utc>) {
    if let serde_json::Value::Object(payload) = &mut record.payload {
        for (name, value) in &patch.fields {
            payload.insert(name.clone(), value.clone());
        }
    }
    record.updated_at = now;
}

/// In-memory double of the SQL entity store, for unit tests of the
/// scoping and dispatch layers.
#[derive(Default)]
pub struct InMemoryEntityStore {
    records: Mutex<HashMap<(EntityKind, String), EntityRecord>>,
}

impl InMemoryEntityStore {
    fn build_record(kind: EntityKind, entity: NewEntity, now: DateTime<Utc>) -> EntityRecord {
        EntityRecord {
            id: entity.id.unwrap_or_else(|| EntityId(Uuid::new_v4().to_string())),
            kind,
            tenant_id: entity.tenant_id,
            payload: entity.payload,
            created_at: now,
            updated_at: now,
        }
    }

    fn sorted_matches(
        records: &HashMap<(EntityKind, String), EntityRecord>,
        kind: EntityKind,
        filter: &Filter,
    ) -> Vec<EntityRecord> {
        let mut found: Vec<EntityRecord> = records
            .values()
            .filter(|record| record.kind == kind && matches(record, filter))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        found
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_one(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| lock_poisoned())?;
        Ok(Self::sorted_matches(&records, kind, &filter).into_iter().next())
    }

    async fn find_many(
        &self,
        kind: EntityKind,
        filter: Filter,
        limit: Option<u32>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| lock_poisoned())?;
        let mut found = Self::sorted_matches(&records, kind, &filter);
        if let Some(limit) = limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn count(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError> {
        let records = self.records.lock().map_err(|_| lock_poisoned())?;
        Ok(Self::sorted_matches(&records, kind, &filter).len() as u64)
    }

    async fn create(
        &self,
        kind: EntityKind,
        entity: NewEntity,
    ) -> Result<EntityRecord, StoreError> {
        let record = Self::build_record(kind, entity, Utc::now());
        let mut records = self.records.lock().map_err(|_| lock_poisoned())?;
        records.insert((kind, record.id.0.clone()), record.clone());
        Ok(record)
    }

    async fn create_many(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let now = Utc::now();
        let mut records = self.records.lock().map_err(|_| lock_poisoned())?;
        let mut created = Vec::with_capacity(entities.len());

        for entity in entities {
            let record = Self::build_record(kind, entity, now);
            records.insert((kind, record.id.0.clone()), record.clone());
            created.push(record);
        }

        Ok(created)
    }

    async fn update_many(
        &self,
        kind: EntityKind,
        filter: Filter,
        patch: Patch,
    ) -> Result<u64, StoreError> {
        if patch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut records = self.records.lock().map_err(|_| lock_poisoned())?;
        let mut affected = 0;

        for record in records.values_mut() {
            if record.kind == kind && matches(record, &filter) {
                apply_patch(record, &patch, now);
                affected += 1;
            }
        }

        Ok(affected)
    }

    async fn delete_many(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError> {
        let mut records = self.records.lock().map_err(|_| lock_poisoned())?;
        let before = records.len();
        records.retain(|_, record| !(record.kind == kind && matches(record, &filter)));
        Ok((before - records.len()) as u64)
    }

    async fn upsert(
        &self,
        kind: EntityKind,
        filter: Filter,
        patch: Patch,
        create: NewEntity,
    ) -> Result<EntityRecord, StoreError> {
        let now = Utc::now();
        let mut records = self.records.lock().map_err(|_| lock_poisoned())?;

        let existing_id = Self::sorted_matches(&records, kind, &filter)
            .into_iter()
            .next()
            .map(|record| record.id.0);

        if let Some(id) = existing_id {
            let record = records
                .get_mut(&(kind, id.clone()))
                .ok_or_else(|| StoreError::Decode(format!("row `{id}` vanished during upsert")))?;
            apply_patch(record, &patch, now);
            return Ok(record.clone());
        }

        let record = Self::build_record(kind, create, now);
        records.insert((kind, record.id.0.clone()), record.clone());
        Ok(record)
    }
}

/// In-memory double of the SQL action store. The proposed-state
/// compare-and-swap happens under one mutex acquisition, mirroring the
/// atomic conditional UPDATE.
#[derive(Default)]
pub struct InMemoryActionStore {
    actions: Mutex<HashMap<String, Action>>,
}

impl InMemoryActionStore {
    pub fn snapshot(&self) -> Vec<Action> {
        match self.actions.lock() {
            Ok(actions) => actions.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }
}

#[async_trait]
impl ActionStore for InMemoryActionStore {
    async fn insert(&self, action: Action) -> Result<Action, StoreError> {
        let mut actions = self.actions.lock().map_err(|_| lock_poisoned())?;

        let existing = actions
            .values()
            .find(|candidate| {
                candidate.tenant_id == action.tenant_id
                    && candidate.idempotency_key == action.idempotency_key
            })
            .cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        actions.insert(action.id.0.clone(), action.clone());
        Ok(action)
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
    ) -> Result<Option<Action>, StoreError> {
        let actions = self.actions.lock().map_err(|_| lock_poisoned())?;
        Ok(actions.get(&id.0).filter(|action| &action.tenant_id == tenant_id).cloned())
    }

    async fn transition_from_proposed(
        &self,
        tenant_id: &TenantId,
        id: &ActionId,
        to: ActionStatus,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut actions = self.actions.lock().map_err(|_| lock_poisoned())?;

        match actions.get_mut(&id.0) {
            Some(action)
                if &action.tenant_id == tenant_id && action.status == ActionStatus::Proposed =>
            {
                action.status = to;
                action.confirmed_at = Some(decided_at);
                action.updated_at = decided_at;
                Ok(true)
            }
            _ => Ok(false),
        }
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
        let mut actions = self.actions.lock().map_err(|_| lock_poisoned())?;

        match actions.get_mut(&id.0) {
            Some(action)
                if &action.tenant_id == tenant_id && action.status == ActionStatus::Confirmed =>
            {
                action.status = to;
                action.result_json = result_json;
                action.error = error;
                action.executed_at = Some(executed_at);
                action.updated_at = executed_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_conversation(
        &self,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Action>, StoreError> {
        let actions = self.actions.lock().map_err(|_| lock_poisoned())?;
        let mut found: Vec<Action> = actions
            .values()
            .filter(|action| {
                &action.tenant_id == tenant_id && &action.conversation_id == conversation_id
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

/// In-memory audit sink with a read-back accessor for assertions. The
/// production trait stays write-only; the accessor exists on the concrete
/// test type.
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| lock_poisoned())?;
        entries.push(entry);
        Ok(())
    }
}
