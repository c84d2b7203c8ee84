use chrono::Utc;
use serde_json::json;

use depot_core::domain::action::{Action, ActionId, ActionStatus, ConversationId};
use depot_core::domain::entity::{EntityId, EntityKind, Filter, NewEntity, Patch};
use depot_core::domain::tenant::{TenantId, UserId};
use depot_core::idempotency::IdempotencyKey;

use crate::actions::{ActionStore, SqlActionStore};
use crate::scoped::ScopedRepository;
use crate::sql_store::SqlEntityStore;
use crate::store::{EntityStore, StoreError};
use crate::DbPool;
use std::sync::Arc;

/// Canonical demo fixtures: two tenants with overlapping inventory names,
/// a customer and an open order each, one pending agent proposal, and a
/// shared unit-of-measure reference row. Deterministic ids so `depot seed`
/// can be re-run and verified.
struct SeedTenantContract {
    tenant_id: &'static str,
    user_id: &'static str,
    customer_id: &'static str,
    customer_name: &'static str,
    order_id: &'static str,
    item_ids: &'static [&'static str],
    item_names: &'static [&'static str],
}

const SEED_TENANTS: &[SeedTenantContract] = &[
    SeedTenantContract {
        tenant_id: "tenant-alpha",
        user_id: "user-alpha-owner",
        customer_id: "cust-alpha-001",
        customer_name: "Harbor Plumbing Supply",
        order_id: "ord-alpha-001",
        item_ids: &["item-alpha-pipe", "item-alpha-valve"],
        item_names: &["copper pipe 15mm", "ball valve"],
    },
    SeedTenantContract {
        tenant_id: "tenant-beta",
        user_id: "user-beta-owner",
        customer_id: "cust-beta-001",
        customer_name: "Northside Builders",
        order_id: "ord-beta-001",
        // Overlapping names with tenant-alpha on purpose: isolation tests
        // rely on name collisions across tenants.
        item_ids: &["item-beta-pipe", "item-beta-fitting"],
        item_names: &["copper pipe 15mm", "elbow fitting"],
    },
];

const SEED_PROPOSED_ACTION_ID: &str = "act-seed-proposal";

#[derive(Debug)]
pub struct SeedResult {
    pub tenants_seeded: Vec<String>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, StoreError> {
        let store: Arc<dyn EntityStore> = Arc::new(SqlEntityStore::new(pool.clone()));
        let actions = SqlActionStore::new(pool.clone());
        let mut tenants_seeded = Vec::with_capacity(SEED_TENANTS.len());

        for contract in SEED_TENANTS {
            let tenant_id = TenantId::new(contract.tenant_id)
                .map_err(|error| StoreError::Decode(error.to_string()))?;
            let repo = ScopedRepository::for_tenant(store.clone(), tenant_id.clone());

            for (item_id, item_name) in contract.item_ids.iter().zip(contract.item_names) {
                repo.upsert(
                    EntityKind::InventoryItem,
                    Filter::by_id(EntityId(item_id.to_string())),
                    Patch::default()
                        .set("name", json!(item_name))
                        .set("on_hand", json!(40)),
                    NewEntity {
                        id: Some(EntityId(item_id.to_string())),
                        tenant_id: None,
                        payload: json!({"name": item_name, "on_hand": 40, "unit": "pcs"}),
                    },
                )
                .await?;
            }

            repo.upsert(
                EntityKind::Customer,
                Filter::by_id(EntityId(contract.customer_id.to_string())),
                Patch::default()
                    .set("name", json!(contract.customer_name)),
                NewEntity {
                    id: Some(EntityId(contract.customer_id.to_string())),
                    tenant_id: None,
                    payload: json!({"name": contract.customer_name, "phone": "555-0100"}),
                },
            )
            .await?;

            repo.upsert(
                EntityKind::Order,
                Filter::by_id(EntityId(contract.order_id.to_string())),
                Patch::default().set("status", json!("open")),
                NewEntity {
                    id: Some(EntityId(contract.order_id.to_string())),
                    tenant_id: None,
                    payload: json!({
                        "customer_id": contract.customer_id,
                        "status": "open",
                        "lines": [{"item_id": contract.item_ids[0], "quantity": 5}],
                    }),
                },
            )
            .await?;

            tenants_seeded.push(contract.tenant_id.to_string());
        }

        // Shared reference data: visible to every tenant, owned by none.
        let unit_filter = Filter::by_id(EntityId("unit-pcs".to_string()));
        if store.find_one(EntityKind::UnitOfMeasure, unit_filter).await?.is_none() {
            store
                .create(
                    EntityKind::UnitOfMeasure,
                    NewEntity {
                        id: Some(EntityId("unit-pcs".to_string())),
                        tenant_id: None,
                        payload: json!({"code": "pcs", "description": "pieces"}),
                    },
                )
                .await?;
        }

        // One pending proposal for the demo confirmation walkthrough. The
        // idempotency index makes a re-run collapse to the existing row.
        let alpha = &SEED_TENANTS[0];
        let user = UserId(alpha.user_id.to_string());
        let arguments = json!({"item_id": alpha.item_ids[0], "delta": -5, "reason": "demo"});
        let now = Utc::now();
        actions
            .insert(Action {
                id: ActionId(SEED_PROPOSED_ACTION_ID.to_string()),
                conversation_id: ConversationId("conv-seed-demo".to_string()),
                tenant_id: TenantId::new(alpha.tenant_id)
                    .map_err(|error| StoreError::Decode(error.to_string()))?,
                user_id: user.clone(),
                capability_name: "adjust_inventory".to_string(),
                arguments_json: arguments.to_string(),
                result_json: None,
                error: None,
                idempotency_key: IdempotencyKey::derive(&user, "adjust_inventory", &arguments),
                status: ActionStatus::Proposed,
                confirmed_at: None,
                executed_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        Ok(SeedResult { tenants_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, StoreError> {
        let store: Arc<dyn EntityStore> = Arc::new(SqlEntityStore::new(pool.clone()));
        let actions = SqlActionStore::new(pool.clone());
        let mut checks: Vec<(&'static str, bool)> = Vec::new();

        for contract in SEED_TENANTS {
            let tenant_id = TenantId::new(contract.tenant_id)
                .map_err(|error| StoreError::Decode(error.to_string()))?;
            let repo = ScopedRepository::for_tenant(store.clone(), tenant_id);

            let items = repo.count(EntityKind::InventoryItem, Filter::default()).await?;
            checks.push(("tenant-inventory", items == contract.item_ids.len() as u64));

            let orders = repo
                .count(EntityKind::Order, Filter::default().field("status", json!("open")))
                .await?;
            checks.push(("tenant-open-order", orders == 1));
        }

        let alpha_tenant = TenantId::new(SEED_TENANTS[0].tenant_id)
            .map_err(|error| StoreError::Decode(error.to_string()))?;
        let proposal = actions
            .find_by_id(&alpha_tenant, &ActionId(SEED_PROPOSED_ACTION_ID.to_string()))
            .await?;
        checks.push((
            "pending-proposal",
            proposal.map(|action| action.status == ActionStatus::Proposed).unwrap_or(false),
        ));

        let unit = store
            .find_one(EntityKind::UnitOfMeasure, Filter::by_id(EntityId("unit-pcs".to_string())))
            .await?;
        checks.push(("shared-unit", unit.is_some()));

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }
}
