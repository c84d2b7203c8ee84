use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use depot_core::audit::{AuditEntry, AuditVerb};
use depot_core::domain::entity::{EntityId, EntityKind, EntityRecord, Filter, NewEntity, Patch};
use depot_core::domain::tenant::TenantContext;
use depot_db::audit::AuditStore;
use depot_db::scoped::ScopedRepository;
use depot_db::store::StoreError;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid arguments for `{capability}`: {message}")]
    InvalidArguments { capability: String, message: String },
    #[error("{0}")]
    Invariant(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("capability `{0}` has no executor")]
    Unsupported(String),
}

/// Result of one capability execution: the JSON payload stored on the
/// action, plus the primary entity the execution touched (absent for
/// reads) so the caller can anchor its audit entry.
#[derive(Debug)]
pub struct ExecutionOutput {
    pub result: Value,
    pub target: Option<(EntityKind, EntityId)>,
}

impl ExecutionOutput {
    fn read(result: Value) -> Self {
        Self { result, target: None }
    }
}

/// Executes capability invocations against a tenant-scoped repository.
/// All tenant filtering happens inside the repository; this layer only
/// translates arguments into store operations and records entity-level
/// audit entries for the writes it performs.
pub struct CapabilityExecutor {
    audit: Arc<dyn AuditStore>,
}

#[derive(Debug, Deserialize)]
struct ListInventoryArgs {
    name: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SearchCustomersArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct ListOrdersArgs {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetVehicleStockArgs {
    vehicle_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderLine {
    item_id: String,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct CreateOrderArgs {
    customer_id: String,
    lines: Vec<OrderLine>,
}

#[derive(Debug, Deserialize)]
struct AdjustInventoryArgs {
    item_id: String,
    delta: i64,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullStockArgs {
    item_id: String,
    vehicle_id: String,
    quantity: i64,
}

fn parse_args<T: DeserializeOwned>(capability: &str, arguments: &Value) -> Result<T, ExecutionError> {
    serde_json::from_value(arguments.clone()).map_err(|error| ExecutionError::InvalidArguments {
        capability: capability.to_string(),
        message: error.to_string(),
    })
}

fn clamp_limit(limit: Option<u32>) -> usize {
    limit.map(|value| value as usize).unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
}

/// Flatten one stored record into its payload with the row id attached.
fn render(record: &EntityRecord) -> Value {
    let mut fields = record.payload.as_object().cloned().unwrap_or_default();
    fields.insert("id".to_string(), json!(record.id.0));
    Value::Object(fields)
}

fn payload_i64(record: &EntityRecord, field: &str) -> i64 {
    record.payload.get(field).and_then(Value::as_i64).unwrap_or(0)
}

fn payload_str<'a>(record: &'a EntityRecord, field: &str) -> &'a str {
    record.payload.get(field).and_then(Value::as_str).unwrap_or_default()
}

impl CapabilityExecutor {
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self { audit }
    }

    pub async fn execute(
        &self,
        ctx: &TenantContext,
        repo: &ScopedRepository,
        capability_name: &str,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        match capability_name {
            "list_inventory" => self.list_inventory(repo, arguments).await,
            "search_customers" => self.search_customers(repo, arguments).await,
            "list_orders" => self.list_orders(repo, arguments).await,
            "get_vehicle_stock" => self.get_vehicle_stock(repo, arguments).await,
            "create_order" => self.create_order(ctx, repo, arguments).await,
            "adjust_inventory" => self.adjust_inventory(ctx, repo, arguments).await,
            "pull_stock" => self.pull_stock(ctx, repo, arguments).await,
            other => Err(ExecutionError::Unsupported(other.to_string())),
        }
    }

    async fn list_inventory(
        &self,
        repo: &ScopedRepository,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let args: ListInventoryArgs = parse_args("list_inventory", arguments)?;
        let limit = clamp_limit(args.limit);

        let records = repo.find_many(EntityKind::InventoryItem, Filter::default(), None).await?;
        let needle = args.name.map(|name| name.to_lowercase());

        let items: Vec<Value> = records
            .iter()
            .filter(|record| match &needle {
                Some(needle) => payload_str(record, "name").to_lowercase().contains(needle),
                None => true,
            })
            .take(limit)
            .map(render)
            .collect();

        Ok(ExecutionOutput::read(json!({ "items": items })))
    }

    async fn search_customers(
        &self,
        repo: &ScopedRepository,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let args: SearchCustomersArgs = parse_args("search_customers", arguments)?;
        let needle = args.query.to_lowercase();

        let records = repo.find_many(EntityKind::Customer, Filter::default(), None).await?;
        let customers: Vec<Value> = records
            .iter()
            .filter(|record| {
                payload_str(record, "name").to_lowercase().contains(&needle)
                    || payload_str(record, "phone").contains(&args.query)
            })
            .take(DEFAULT_LIST_LIMIT)
            .map(render)
            .collect();

        Ok(ExecutionOutput::read(json!({ "customers": customers })))
    }

    async fn list_orders(
        &self,
        repo: &ScopedRepository,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let args: ListOrdersArgs = parse_args("list_orders", arguments)?;

        let mut filter = Filter::default();
        if let Some(status) = args.status {
            filter = filter.field("status", json!(status));
        }

        let records = repo.find_many(EntityKind::Order, filter, None).await?;
        let orders: Vec<Value> =
            records.iter().take(DEFAULT_LIST_LIMIT).map(render).collect();

        Ok(ExecutionOutput::read(json!({ "orders": orders })))
    }

    async fn get_vehicle_stock(
        &self,
        repo: &ScopedRepository,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let args: GetVehicleStockArgs = parse_args("get_vehicle_stock", arguments)?;

        let records = repo
            .find_many(
                EntityKind::VehicleStockItem,
                Filter::default().field("vehicle_id", json!(args.vehicle_id)),
                None,
            )
            .await?;
        let stock: Vec<Value> = records.iter().map(render).collect();

        Ok(ExecutionOutput::read(json!({ "vehicle_id": args.vehicle_id, "stock": stock })))
    }

    async fn create_order(
        &self,
        ctx: &TenantContext,
        repo: &ScopedRepository,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let args: CreateOrderArgs = parse_args("create_order", arguments)?;

        if args.lines.is_empty() {
            return Err(ExecutionError::Invariant("an order needs at least one line".to_string()));
        }
        if args.lines.iter().any(|line| line.quantity < 1) {
            return Err(ExecutionError::Invariant(
                "order line quantities must be at least 1".to_string(),
            ));
        }

        let customer = repo
            .find_one(EntityKind::Customer, Filter::by_id(EntityId(args.customer_id.clone())))
            .await?;
        if customer.is_none() {
            return Err(ExecutionError::Invariant(format!(
                "customer `{}` does not exist",
                args.customer_id
            )));
        }

        let lines: Vec<Value> = args
            .lines
            .iter()
            .map(|line| json!({"item_id": line.item_id, "quantity": line.quantity}))
            .collect();

        let order = repo
            .create(
                EntityKind::Order,
                NewEntity::with_payload(json!({
                    "customer_id": args.customer_id,
                    "status": "open",
                    "lines": lines,
                })),
            )
            .await?;

        self.audit_best_effort(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                Some(ctx.user_id.clone()),
                EntityKind::Order,
                order.id.clone(),
                AuditVerb::Create,
                order.payload.clone(),
            )
            .with_source("agent"),
        )
        .await;

        Ok(ExecutionOutput {
            result: json!({ "order": render(&order) }),
            target: Some((EntityKind::Order, order.id)),
        })
    }

    async fn adjust_inventory(
        &self,
        ctx: &TenantContext,
        repo: &ScopedRepository,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let args: AdjustInventoryArgs = parse_args("adjust_inventory", arguments)?;

        let item_id = EntityId(args.item_id.clone());
        let item = repo
            .find_one(EntityKind::InventoryItem, Filter::by_id(item_id.clone()))
            .await?
            .ok_or_else(|| {
                ExecutionError::Invariant(format!("inventory item `{}` does not exist", args.item_id))
            })?;

        let on_hand = payload_i64(&item, "on_hand");
        let new_on_hand = on_hand + args.delta;
        if new_on_hand < 0 {
            return Err(ExecutionError::Invariant(format!(
                "adjustment of {} would drive on-hand below zero (current {on_hand})",
                args.delta
            )));
        }

        repo.update(
            EntityKind::InventoryItem,
            item_id.clone(),
            Patch::default().set("on_hand", json!(new_on_hand)),
        )
        .await?;

        repo.create(
            EntityKind::InventoryTransaction,
            NewEntity::with_payload(json!({
                "item_id": args.item_id,
                "kind": "adjustment",
                "delta": args.delta,
                "reason": args.reason,
            })),
        )
        .await?;

        self.audit_best_effort(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                Some(ctx.user_id.clone()),
                EntityKind::InventoryItem,
                item_id.clone(),
                AuditVerb::Update,
                json!({"delta": args.delta, "on_hand": new_on_hand}),
            )
            .with_source("agent"),
        )
        .await;

        Ok(ExecutionOutput {
            result: json!({ "item_id": args.item_id, "on_hand": new_on_hand }),
            target: Some((EntityKind::InventoryItem, item_id)),
        })
    }

    async fn pull_stock(
        &self,
        ctx: &TenantContext,
        repo: &ScopedRepository,
        arguments: &Value,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let args: PullStockArgs = parse_args("pull_stock", arguments)?;

        if args.quantity < 1 {
            return Err(ExecutionError::Invariant("pull quantity must be at least 1".to_string()));
        }

        let item_id = EntityId(args.item_id.clone());
        let item = repo
            .find_one(EntityKind::InventoryItem, Filter::by_id(item_id.clone()))
            .await?
            .ok_or_else(|| {
                ExecutionError::Invariant(format!("inventory item `{}` does not exist", args.item_id))
            })?;

        let on_hand = payload_i64(&item, "on_hand");
        if on_hand < args.quantity {
            return Err(ExecutionError::Invariant(format!(
                "cannot pull {} of `{}`: only {on_hand} on hand",
                args.quantity, args.item_id
            )));
        }

        repo.update(
            EntityKind::InventoryItem,
            item_id.clone(),
            Patch::default().set("on_hand", json!(on_hand - args.quantity)),
        )
        .await?;

        let vehicle_filter = Filter::default()
            .field("vehicle_id", json!(args.vehicle_id))
            .field("item_id", json!(args.item_id));
        let loaded = match repo
            .find_one(EntityKind::VehicleStockItem, vehicle_filter.clone())
            .await?
        {
            Some(existing) => {
                let quantity = payload_i64(&existing, "quantity") + args.quantity;
                repo.update(
                    EntityKind::VehicleStockItem,
                    existing.id.clone(),
                    Patch::default().set("quantity", json!(quantity)),
                )
                .await?;
                quantity
            }
            None => {
                repo.create(
                    EntityKind::VehicleStockItem,
                    NewEntity::with_payload(json!({
                        "vehicle_id": args.vehicle_id,
                        "item_id": args.item_id,
                        "quantity": args.quantity,
                    })),
                )
                .await?;
                args.quantity
            }
        };

        repo.create(
            EntityKind::InventoryTransaction,
            NewEntity::with_payload(json!({
                "item_id": args.item_id,
                "kind": "pull",
                "delta": -args.quantity,
                "vehicle_id": args.vehicle_id,
            })),
        )
        .await?;

        self.audit_best_effort(
            AuditEntry::new(
                ctx.tenant_id.clone(),
                Some(ctx.user_id.clone()),
                EntityKind::InventoryItem,
                item_id.clone(),
                AuditVerb::Update,
                json!({
                    "pulled": args.quantity,
                    "vehicle_id": args.vehicle_id,
                    "on_hand": on_hand - args.quantity,
                }),
            )
            .with_source("agent"),
        )
        .await;

        Ok(ExecutionOutput {
            result: json!({
                "item_id": args.item_id,
                "vehicle_id": args.vehicle_id,
                "on_vehicle": loaded,
                "on_hand": on_hand - args.quantity,
            }),
            target: Some((EntityKind::InventoryItem, item_id)),
        })
    }

    /// Audit writes never fail the primary operation.
    async fn audit_best_effort(&self, entry: AuditEntry) {
        if let Err(error) = self.audit.record(entry).await {
            tracing::error!(
                event_name = "agent.audit.write_failed",
                error = %error,
                "audit write failed; continuing"
            );
        }
    }
}
