use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use depot_core::domain::entity::{EntityId, EntityKind, EntityRecord, Filter, NewEntity, Patch};
use depot_core::domain::tenant::TenantId;

use crate::actions::parse_timestamp;
use crate::store::{EntityStore, StoreError};
use crate::DbPool;

/// SQLite-backed entity store. All kinds share one `entity` table; domain
/// fields live in the JSON payload and filter clauses compile to
/// `json_extract` comparisons.
pub struct SqlEntityStore {
    pool: DbPool,
}

impl SqlEntityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

enum BindValue {
    Text(String),
    Int(i64),
    Float(f64),
}

/// Filter field names reach the SQL text inside a json path, so they are
/// restricted to identifier characters.
fn validate_field_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::Decode(format!("invalid filter field name `{name}`")))
    }
}

fn scalar_bind(value: &serde_json::Value) -> Result<Option<BindValue>, StoreError> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Bool(flag) => Ok(Some(BindValue::Int(i64::from(*flag)))),
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Ok(Some(BindValue::Int(int)))
            } else if let Some(float) = number.as_f64() {
                Ok(Some(BindValue::Float(float)))
            } else {
                Err(StoreError::Decode(format!("unsupported numeric filter value `{number}`")))
            }
        }
        serde_json::Value::String(text) => Ok(Some(BindValue::Text(text.clone()))),
        other => Err(StoreError::Decode(format!(
            "filter values must be scalars, got `{other}`"
        ))),
    }
}

fn build_clauses(
    kind: EntityKind,
    filter: &Filter,
) -> Result<(String, Vec<BindValue>), StoreError> {
    let mut clauses = vec!["kind = ?".to_string()];
    let mut binds = vec![BindValue::Text(kind.as_str().to_string())];

    if let Some(id) = &filter.id {
        clauses.push("id = ?".to_string());
        binds.push(BindValue::Text(id.0.clone()));
    }

    if let Some(tenant_id) = &filter.tenant_id {
        clauses.push("tenant_id = ?".to_string());
        binds.push(BindValue::Text(tenant_id.as_str().to_string()));
    }

    for (name, value) in &filter.fields {
        validate_field_name(name)?;
        match scalar_bind(value)? {
            Some(bind) => {
                clauses.push(format!("json_extract(payload, '$.{name}') = ?"));
                binds.push(bind);
            }
            None => clauses.push(format!("json_extract(payload, '$.{name}') IS NULL")),
        }
    }

    Ok((clauses.join(" AND "), binds))
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &'q [BindValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            BindValue::Text(value) => query.bind(value.as_str()),
            BindValue::Int(value) => query.bind(*value),
            BindValue::Float(value) => query.bind(*value),
        };
    }
    query
}

fn record_from_row(row: SqliteRow) -> Result<EntityRecord, StoreError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = EntityKind::parse(&kind_raw)
        .ok_or_else(|| StoreError::Decode(format!("unknown entity kind `{kind_raw}`")))?;

    let tenant_id = row
        .try_get::<Option<String>, _>("tenant_id")?
        .map(|value| {
            TenantId::new(value)
                .map_err(|error| StoreError::Decode(format!("invalid tenant id: {error}")))
        })
        .transpose()?;

    let payload_raw = row.try_get::<String, _>("payload")?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|error| StoreError::Decode(format!("invalid payload json: {error}")))?;

    Ok(EntityRecord {
        id: EntityId(row.try_get("id")?),
        kind,
        tenant_id,
        payload,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

const SELECT_COLUMNS: &str = "id, kind, tenant_id, payload, created_at, updated_at";

#[async_trait]
impl EntityStore for SqlEntityStore {
    async fn find_one(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let (clauses, binds) = build_clauses(kind, &filter)?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM entity WHERE {clauses} ORDER BY created_at ASC LIMIT 1"
        );

        let row = bind_all(sqlx::query(&sql), &binds).fetch_optional(&self.pool).await?;
        row.map(record_from_row).transpose()
    }

    async fn find_many(
        &self,
        kind: EntityKind,
        filter: Filter,
        limit: Option<u32>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let (clauses, binds) = build_clauses(kind, &filter)?;
        let sql = match limit {
            Some(limit) => format!(
                "SELECT {SELECT_COLUMNS} FROM entity WHERE {clauses}
                 ORDER BY created_at ASC LIMIT {limit}"
            ),
            None => format!(
                "SELECT {SELECT_COLUMNS} FROM entity WHERE {clauses} ORDER BY created_at ASC"
            ),
        };

        let rows = bind_all(sqlx::query(&sql), &binds).fetch_all(&self.pool).await?;
        rows.into_iter().map(record_from_row).collect()
    }

    async fn count(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError> {
        let (clauses, binds) = build_clauses(kind, &filter)?;
        let sql = format!("SELECT COUNT(*) AS count FROM entity WHERE {clauses}");

        let count =
            bind_all(sqlx::query(&sql), &binds).fetch_one(&self.pool).await?.get::<i64, _>("count");
        u64::try_from(count)
            .map_err(|_| StoreError::Decode(format!("negative row count `{count}`")))
    }

    async fn create(
        &self,
        kind: EntityKind,
        entity: NewEntity,
    ) -> Result<EntityRecord, StoreError> {
        let now = Utc::now();
        let record = EntityRecord {
            id: entity.id.unwrap_or_else(|| EntityId(Uuid::new_v4().to_string())),
            kind,
            tenant_id: entity.tenant_id,
            payload: entity.payload,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO entity (id, kind, tenant_id, payload, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(record.kind.as_str())
        .bind(record.tenant_id.as_ref().map(TenantId::as_str))
        .bind(record.payload.to_string())
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn create_many(
        &self,
        kind: EntityKind,
        entities: Vec<NewEntity>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut records = Vec::with_capacity(entities.len());

        for entity in entities {
            let record = EntityRecord {
                id: entity.id.unwrap_or_else(|| EntityId(Uuid::new_v4().to_string())),
                kind,
                tenant_id: entity.tenant_id,
                payload: entity.payload,
                created_at: now,
                updated_at: now,
            };

            sqlx::query(
                "INSERT INTO entity (id, kind, tenant_id, payload, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.id.0)
            .bind(record.kind.as_str())
            .bind(record.tenant_id.as_ref().map(TenantId::as_str))
            .bind(record.payload.to_string())
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            records.push(record);
        }

        tx.commit().await?;
        Ok(records)
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

        let (clauses, binds) = build_clauses(kind, &filter)?;

        let mut set_paths = Vec::with_capacity(patch.fields.len());
        let mut set_binds = Vec::with_capacity(patch.fields.len());
        for (name, value) in &patch.fields {
            validate_field_name(name)?;
            set_paths.push(format!("'$.{name}', json(?)"));
            set_binds.push(BindValue::Text(value.to_string()));
        }
        set_binds.push(BindValue::Text(Utc::now().to_rfc3339()));

        let sql = format!(
            "UPDATE entity SET payload = json_set(payload, {}), updated_at = ? WHERE {clauses}",
            set_paths.join(", ")
        );

        let mut query = bind_all(sqlx::query(&sql), &set_binds);
        query = bind_all(query, &binds);
        let result = query.execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    async fn delete_many(&self, kind: EntityKind, filter: Filter) -> Result<u64, StoreError> {
        let (clauses, binds) = build_clauses(kind, &filter)?;
        let sql = format!("DELETE FROM entity WHERE {clauses}");

        let result = bind_all(sqlx::query(&sql), &binds).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn upsert(
        &self,
        kind: EntityKind,
        filter: Filter,
        patch: Patch,
        create: NewEntity,
    ) -> Result<EntityRecord, StoreError> {
        match self.find_one(kind, filter.clone()).await? {
            Some(existing) => {
                self.update_many(kind, Filter::by_id(existing.id.clone()), patch).await?;
                self.find_one(kind, Filter::by_id(existing.id.clone())).await?.ok_or_else(|| {
                    StoreError::Decode(format!("row `{}` vanished during upsert", existing.id.0))
                })
            }
            None => self.create(kind, create).await,
        }
    }
}
