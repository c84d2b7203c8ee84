use std::sync::Arc;

use depot_core::domain::entity::{EntityId, EntityKind, EntityRecord, Filter, NewEntity, Patch};
use depot_core::domain::tenant::{TenantContext, TenantId};

use crate::store::{EntityStore, StoreError};

/// Tenant-scoped view over the entity store.
///
/// One repository is built per request from its `TenantContext` and never
/// shared across requests. A `TenantId` cannot be blank, so a repository
/// without a real tenant cannot exist; there is no unscoped fallback.
///
/// For tenant-owned kinds every read and mutation carries an
/// unconditional tenant clause and every created row is stamped with the
/// repository's tenant id, regardless of what the caller put in the
/// filter or payload. Kinds outside the owned set (global reference data)
/// pass through unmodified. Storage errors propagate unchanged; this
/// layer only rewrites arguments.
pub struct ScopedRepository {
    store: Arc<dyn EntityStore>,
    tenant_id: TenantId,
}

impl ScopedRepository {
    pub fn new(store: Arc<dyn EntityStore>, ctx: &TenantContext) -> Self {
        Self::for_tenant(store, ctx.tenant_id.clone())
    }

    pub fn for_tenant(store: Arc<dyn EntityStore>, tenant_id: TenantId) -> Self {
        Self { store, tenant_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    fn scope(&self, kind: EntityKind, filter: Filter) -> Filter {
        if kind.is_tenant_owned() {
            filter.scoped_to(self.tenant_id.clone())
        } else {
            filter
        }
    }

    fn stamp(&self, kind: EntityKind, mut entity: NewEntity) -> NewEntity {
        if kind.is_tenant_owned() {
            entity.tenant_id = Some(self.tenant_id.clone());
        }
        entity
    }

    pub async fn find_one(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> Result<Option<EntityRecord>, StoreError> {
        self.store.find_one(kind, self.scope(kind, filter)).await
    }

    pub async fn find_many(
        &self,
        kind: EntityKind,
        filter: Filter,
        limit: Option<u32>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        self.store.find_many(kind, self.scope(kind, filter), limit).await
    }

    pub async fn count(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError> {
        self.store.count(kind, self.scope(kind, filter)).await
    }

    pub async fn create(
        &self,
        kind: EntityKind,
        entity: NewEntity,
    ) -> Result<EntityRecord, StoreError> {
        self.store.create(kind, self.stamp(kind, entity)).await
    }

    pub async fn create_many(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let stamped = entities.into_iter().map(|entity| self.stamp(kind, entity)).collect();
        self.store.create_many(kind, stamped).await
    }

    pub async fn update(
        &self,
        kind: EntityKind,
        id: EntityId,
        patch: Patch,
    ) -> Result<u64, StoreError> {
        self.update_many(kind, Filter::by_id(id), patch).await
    }

    pub async fn update_many(
        &self,
        kind: EntityKind,
        filter: Filter,
        patch: Patch,
    ) -> Result<u64, StoreError> {
        self.store.update_many(kind, self.scope(kind, filter), patch).await
    }

    pub async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<u64, StoreError> {
        self.delete_many(kind, Filter::by_id(id)).await
    }

    pub async fn delete_many(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError> {
        self.store.delete_many(kind, self.scope(kind, filter)).await
    }

    pub async fn upsert(
        &self,
        kind: EntityKind,
        filter: Filter,
        patch: Patch,
        create: NewEntity,
    ) -> Result<EntityRecord, StoreError> {
        let scoped = self.scope(kind, filter);
        let stamped = self.stamp(kind, create);
        self.store.upsert(kind, scoped, patch, stamped).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use depot_core::domain::entity::{EntityId, EntityKind, Filter, NewEntity, Patch};
    use depot_core::domain::tenant::TenantId;

    use super::ScopedRepository;
    use crate::memory::InMemoryEntityStore;
    use crate::store::EntityStore;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).expect("tenant id")
    }

    fn repo(store: &Arc<InMemoryEntityStore>, id: &str) -> ScopedRepository {
        let store: Arc<dyn EntityStore> = store.clone();
        ScopedRepository::for_tenant(store, tenant(id))
    }

    #[tokio::test]
    async fn unfiltered_reads_see_only_the_repository_tenant() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");
        let repo_b = repo(&store, "T-B");

        // Overlapping item names across tenants.
        for (repo, name) in [(&repo_a, "copper pipe"), (&repo_b, "copper pipe")] {
            repo.create(
                EntityKind::InventoryItem,
                NewEntity::with_payload(json!({"name": name, "on_hand": 10})),
            )
            .await
            .expect("create item");
        }

        let seen_by_b = repo_b
            .find_many(EntityKind::InventoryItem, Filter::default(), None)
            .await
            .expect("find many");

        assert_eq!(seen_by_b.len(), 1);
        assert_eq!(seen_by_b[0].tenant_id, Some(tenant("T-B")));
        assert_eq!(repo_a.count(EntityKind::InventoryItem, Filter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn caller_supplied_tenant_clause_is_overwritten() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");
        let repo_b = repo(&store, "T-B");

        repo_b
            .create(EntityKind::Customer, NewEntity::with_payload(json!({"name": "Acme"})))
            .await
            .expect("create customer");

        // A hostile filter naming tenant B is rewritten to tenant A.
        let leaked = repo_a
            .find_many(
                EntityKind::Customer,
                Filter { tenant_id: Some(tenant("T-B")), ..Filter::default() },
                None,
            )
            .await
            .expect("find many");

        assert!(leaked.is_empty());
    }

    #[tokio::test]
    async fn creates_stamp_the_tenant_regardless_of_payload() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");

        let created = repo_a
            .create(
                EntityKind::Order,
                NewEntity {
                    id: None,
                    tenant_id: Some(tenant("T-B")),
                    payload: json!({"customer_id": "C-1", "tenant_id": "T-B"}),
                },
            )
            .await
            .expect("create order");

        assert_eq!(created.tenant_id, Some(tenant("T-A")));
    }

    #[tokio::test]
    async fn cross_tenant_delete_by_id_is_a_no_op() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");
        let repo_b = repo(&store, "T-B");

        let row = repo_b
            .create(EntityKind::InventoryItem, NewEntity::with_payload(json!({"name": "valve"})))
            .await
            .expect("create item");

        let deleted = repo_a.delete(EntityKind::InventoryItem, row.id.clone()).await.unwrap();
        assert_eq!(deleted, 0);

        let still_there =
            repo_b.find_one(EntityKind::InventoryItem, Filter::by_id(row.id)).await.unwrap();
        assert!(still_there.is_some());
    }

    #[tokio::test]
    async fn cross_tenant_update_by_id_is_a_no_op() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");
        let repo_b = repo(&store, "T-B");

        let row = repo_b
            .create(
                EntityKind::InventoryItem,
                NewEntity::with_payload(json!({"name": "valve", "on_hand": 4})),
            )
            .await
            .expect("create item");

        let updated = repo_a
            .update(EntityKind::InventoryItem, row.id.clone(), Patch::default().set("on_hand", json!(0)))
            .await
            .unwrap();
        assert_eq!(updated, 0);

        let current =
            repo_b.find_one(EntityKind::InventoryItem, Filter::by_id(row.id)).await.unwrap();
        assert_eq!(current.expect("row").payload["on_hand"], json!(4));
    }

    #[tokio::test]
    async fn upsert_stamps_tenant_on_the_creation_branch() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");

        let created = repo_a
            .upsert(
                EntityKind::InventoryItem,
                Filter::default().field("name", json!("gasket")),
                Patch::default().set("on_hand", json!(12)),
                NewEntity {
                    id: None,
                    tenant_id: Some(tenant("T-B")),
                    payload: json!({"name": "gasket", "on_hand": 12}),
                },
            )
            .await
            .expect("upsert");

        assert_eq!(created.tenant_id, Some(tenant("T-A")));

        // Second upsert matches the existing row and patches it in place.
        let patched = repo_a
            .upsert(
                EntityKind::InventoryItem,
                Filter::default().field("name", json!("gasket")),
                Patch::default().set("on_hand", json!(20)),
                NewEntity::with_payload(json!({"name": "gasket", "on_hand": 1})),
            )
            .await
            .expect("second upsert");

        assert_eq!(patched.id, created.id);
        assert_eq!(patched.payload["on_hand"], json!(20));
        assert_eq!(repo_a.count(EntityKind::InventoryItem, Filter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reference_kinds_pass_through_unscoped() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");
        let repo_b = repo(&store, "T-B");

        let unit = repo_a
            .create(EntityKind::UnitOfMeasure, NewEntity::with_payload(json!({"code": "kg"})))
            .await
            .expect("create unit");

        assert_eq!(unit.tenant_id, None);

        let seen_by_b =
            repo_b.find_many(EntityKind::UnitOfMeasure, Filter::default(), None).await.unwrap();
        assert_eq!(seen_by_b.len(), 1);
    }

    #[tokio::test]
    async fn create_many_stamps_every_record() {
        let store = Arc::new(InMemoryEntityStore::default());
        let repo_a = repo(&store, "T-A");

        let rows = repo_a
            .create_many(
                EntityKind::Customer,
                vec![
                    NewEntity::with_payload(json!({"name": "Acme"})),
                    NewEntity {
                        id: Some(EntityId("cust-2".to_string())),
                        tenant_id: Some(tenant("T-B")),
                        payload: json!({"name": "Globex"}),
                    },
                ],
            )
            .await
            .expect("create many");

        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.tenant_id, Some(tenant("T-A")));
        }
    }
}
