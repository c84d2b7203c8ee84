use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tenant::TenantId;

/// The closed set of entity kinds the storage boundary understands.
///
/// Scoping is decided by an exhaustive match, so adding a kind forces an
/// explicit tenant-ownership decision at compile time instead of falling
/// through a generic interception hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Branch,
    Customer,
    InventoryItem,
    VehicleStockItem,
    Order,
    InventoryTransaction,
    UnitOfMeasure,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Branch => "branch",
            Self::Customer => "customer",
            Self::InventoryItem => "inventory_item",
            Self::VehicleStockItem => "vehicle_stock_item",
            Self::Order => "order",
            Self::InventoryTransaction => "inventory_transaction",
            Self::UnitOfMeasure => "unit_of_measure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "branch" => Some(Self::Branch),
            "customer" => Some(Self::Customer),
            "inventory_item" => Some(Self::InventoryItem),
            "vehicle_stock_item" => Some(Self::VehicleStockItem),
            "order" => Some(Self::Order),
            "inventory_transaction" => Some(Self::InventoryTransaction),
            "unit_of_measure" => Some(Self::UnitOfMeasure),
            _ => None,
        }
    }

    /// Whether rows of this kind belong to a tenant. `UnitOfMeasure` is
    /// global reference data and passes through the scoping layer
    /// unmodified.
    pub fn is_tenant_owned(&self) -> bool {
        match self {
            Self::User
            | Self::Branch
            | Self::Customer
            | Self::InventoryItem
            | Self::VehicleStockItem
            | Self::Order
            | Self::InventoryTransaction => true,
            Self::UnitOfMeasure => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

/// One stored row at the opaque CRUD boundary. Domain fields ride in the
/// JSON payload; identity, kind, and ownership are first-class columns so
/// the scoping layer can enforce them without understanding the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub tenant_id: Option<TenantId>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation input. A caller-supplied tenant id is advisory at best: the
/// scoping layer overwrites it for tenant-owned kinds.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NewEntity {
    pub id: Option<EntityId>,
    pub tenant_id: Option<TenantId>,
    pub payload: serde_json::Value,
}

impl NewEntity {
    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self { id: None, tenant_id: None, payload }
    }
}

/// Closed filter shape accepted by every read, update, and delete
/// operation: optional row id, optional tenant clause, and exact-match
/// clauses on top-level payload fields. There is no escape hatch for
/// arbitrary predicates, so the tenant clause cannot be unset or shadowed
/// by caller input.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Filter {
    pub id: Option<EntityId>,
    pub tenant_id: Option<TenantId>,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Filter {
    pub fn by_id(id: EntityId) -> Self {
        Self { id: Some(id), ..Self::default() }
    }

    pub fn field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Force the tenant clause. Used only by the scoping layer; merging is
    /// unconditional, so whatever the caller put there is discarded.
    pub fn scoped_to(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

/// Field-level patch applied by update operations. Fields are merged into
/// the payload; identity, kind, and tenant id are never patchable.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Patch {
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Patch {
    pub fn set(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
