use async_trait::async_trait;
use thiserror::Error;

use depot_core::domain::entity::{EntityKind, EntityRecord, Filter, NewEntity, Patch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// The opaque CRUD boundary over entity storage.
///
/// The operation set is closed and every implementation matches
/// exhaustively on `EntityKind`; there is no generic interception hook a
/// new operation kind could slip past. Single-row update/delete are the
/// `*_many` forms with an id filter, which the scoping layer exposes as
/// their own operations.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_one(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> Result<Option<EntityRecord>, StoreError>;

    async fn find_many(
        &self,
        kind: EntityKind,
        filter: Filter,
        limit: Option<u32>,
    ) -> Result<Vec<EntityRecord>, StoreError>;

    async fn count(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError>;

    async fn create(&self, kind: EntityKind, entity: NewEntity)
        -> Result<EntityRecord, StoreError>;

    async fn create_many(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> Result<Vec<EntityRecord>, StoreError>;

    async fn update_many(
        &self,
        kind: EntityKind,
        filter: Filter,
        patch: Patch,
    ) -> Result<u64, StoreError>;

    async fn delete_many(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError>;

    /// Update the first row matching `filter`, or create `create` when no
    /// row matches. Returns the resulting row.
    async fn upsert(
        &self,
        kind: EntityKind,
        filter: Filter,
        patch: Patch,
        create: NewEntity,
    ) -> Result<EntityRecord, StoreError>;
}
