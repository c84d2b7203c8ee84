use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use depot_core::audit::{AuditEntry, AuditVerb};
use depot_core::domain::action::{Action, ActionId, ActionStatus};
use depot_core::domain::entity::{EntityId, EntityKind};
use depot_core::domain::tenant::TenantContext;
use depot_core::errors::ApplicationError;
use depot_db::actions::ActionStore;
use depot_db::audit::AuditStore;
use depot_db::scoped::ScopedRepository;
use depot_db::store::EntityStore;

use crate::executor::CapabilityExecutor;

/// Applies a user's confirm/cancel decision to a pending action exactly
/// once.
///
/// The proposed → confirmed/cancelled transition is delegated to the
/// action store's compare-and-swap; whichever caller loses the swap gets
/// a conflict and no execution. Confirmed actions execute with the
/// arguments stored at proposal time, never arguments resupplied at
/// confirm time.
pub struct ConfirmationHandler {
    entity_store: Arc<dyn EntityStore>,
    actions: Arc<dyn ActionStore>,
    audit: Arc<dyn AuditStore>,
    executor: Arc<CapabilityExecutor>,
    execution_timeout: Duration,
}

impl ConfirmationHandler {
    pub fn new(
        entity_store: Arc<dyn EntityStore>,
        actions: Arc<dyn ActionStore>,
        audit: Arc<dyn AuditStore>,
        executor: Arc<CapabilityExecutor>,
        execution_timeout: Duration,
    ) -> Self {
        Self { entity_store, actions, audit, executor, execution_timeout }
    }

    pub async fn resolve(
        &self,
        ctx: &TenantContext,
        action_id: &ActionId,
        confirmed: bool,
    ) -> Result<Action, ApplicationError> {
        // Cross-tenant ids fall out here: the lookup carries the caller's
        // tenant and simply finds nothing.
        let action = self
            .load(ctx, action_id)
            .await?
            .ok_or_else(|| ApplicationError::ActionNotFound(action_id.0.clone()))?;

        let decision =
            if confirmed { ActionStatus::Confirmed } else { ActionStatus::Cancelled };
        let decided_at = Utc::now();

        // Fast path for already-decided actions; the compare-and-swap
        // below remains the authority under races.
        if !action.status.can_transition_to(decision) {
            return Err(ApplicationError::Conflict {
                action_id: action_id.0.clone(),
                status: action.status,
            });
        }

        let won = self
            .actions
            .transition_from_proposed(&ctx.tenant_id, action_id, decision, decided_at)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        if !won {
            let current = self
                .load(ctx, action_id)
                .await?
                .ok_or_else(|| ApplicationError::ActionNotFound(action_id.0.clone()))?;
            return Err(ApplicationError::Conflict {
                action_id: action_id.0.clone(),
                status: current.status,
            });
        }

        if !confirmed {
            self.audit_decision(ctx, &action, AuditVerb::Cancel, None, ActionStatus::Cancelled)
                .await;
            return self.reload(ctx, action_id).await;
        }

        let arguments = stored_arguments(&action);
        let repo = ScopedRepository::new(self.entity_store.clone(), ctx);

        let executed = tokio::time::timeout(
            self.execution_timeout,
            self.executor.execute(ctx, &repo, &action.capability_name, &arguments),
        )
        .await;

        let (status, result_json, error, target) = match executed {
            Ok(Ok(output)) => {
                (ActionStatus::Executed, Some(output.result.to_string()), None, output.target)
            }
            Ok(Err(execution_error)) => {
                (ActionStatus::Failed, None, Some(execution_error.to_string()), None)
            }
            Err(_elapsed) => (
                ActionStatus::TimedOut,
                None,
                Some("capability execution deadline exceeded".to_string()),
                None,
            ),
        };

        let recorded = self
            .actions
            .record_outcome(
                &ctx.tenant_id,
                action_id,
                status,
                result_json,
                error,
                Utc::now(),
            )
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        if !recorded {
            tracing::warn!(
                event_name = "agent.confirm.outcome_not_recorded",
                action_id = %action_id.0,
                "action left the confirmed state before its outcome was recorded"
            );
        }

        self.audit_decision(ctx, &action, AuditVerb::Confirm, target, status).await;
        self.reload(ctx, action_id).await
    }

    async fn load(
        &self,
        ctx: &TenantContext,
        action_id: &ActionId,
    ) -> Result<Option<Action>, ApplicationError> {
        self.actions
            .find_by_id(&ctx.tenant_id, action_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))
    }

    async fn reload(
        &self,
        ctx: &TenantContext,
        action_id: &ActionId,
    ) -> Result<Action, ApplicationError> {
        self.load(ctx, action_id)
            .await?
            .ok_or_else(|| ApplicationError::ActionNotFound(action_id.0.clone()))
    }

    /// One audit line per decision, best-effort. Entity-level entries for
    /// the rows an execution touched are written by the executor itself.
    async fn audit_decision(
        &self,
        ctx: &TenantContext,
        action: &Action,
        verb: AuditVerb,
        target: Option<(EntityKind, EntityId)>,
        outcome: ActionStatus,
    ) {
        let (entity_kind, entity_id) = target.unwrap_or_else(|| {
            (fallback_kind(&action.capability_name), EntityId(action.id.0.clone()))
        });

        let entry = AuditEntry::new(
            ctx.tenant_id.clone(),
            Some(ctx.user_id.clone()),
            entity_kind,
            entity_id,
            verb,
            json!({
                "action_id": action.id.0,
                "capability": action.capability_name,
                "outcome": outcome.as_str(),
            }),
        )
        .with_source("agent");

        if let Err(error) = self.audit.record(entry).await {
            tracing::error!(
                event_name = "agent.audit.write_failed",
                error = %error,
                "audit write failed; continuing"
            );
        }
    }
}

/// Only write capabilities reach confirmation; this anchors decision
/// entries for executions that produced no concrete row.
fn fallback_kind(capability_name: &str) -> EntityKind {
    match capability_name {
        "create_order" => EntityKind::Order,
        _ => EntityKind::InventoryItem,
    }
}

/// Proposal-time arguments are the only arguments that ever execute. They
/// were canonicalized at dispatch; an undecodable value degrades to empty
/// arguments and fails argument validation downstream.
fn stored_arguments(action: &Action) -> Value {
    serde_json::from_str(&action.arguments_json).unwrap_or_else(|_| json!({}))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use depot_core::capability::CapabilityRegistry;
    use depot_core::domain::action::{ActionStatus, ConversationId};
    use depot_core::domain::entity::{EntityId, EntityKind, Filter, NewEntity};
    use depot_core::domain::tenant::{Role, TenantContext, TenantId, UserId};
    use depot_core::errors::ApplicationError;
    use depot_db::actions::{ActionStore, SqlActionStore};
    use depot_db::audit::AuditStore;
    use depot_db::memory::{InMemoryActionStore, InMemoryAuditStore, InMemoryEntityStore};
    use depot_db::scoped::ScopedRepository;
    use depot_db::sql_store::SqlEntityStore;
    use depot_db::store::EntityStore;
    use depot_db::{connect_with_settings, migrations};

    use super::ConfirmationHandler;
    use crate::dispatcher::ActionDispatcher;
    use crate::executor::CapabilityExecutor;
    use crate::llm::ToolCall;

    struct Harness {
        entity_store: Arc<dyn EntityStore>,
        audit: Arc<InMemoryAuditStore>,
        dispatcher: ActionDispatcher,
        handler: ConfirmationHandler,
    }

    fn memory_harness() -> Harness {
        build_harness(
            Arc::new(InMemoryEntityStore::default()),
            Arc::new(InMemoryActionStore::default()),
            Duration::from_secs(5),
        )
    }

    fn build_harness(
        entity_store: Arc<dyn EntityStore>,
        actions: Arc<dyn ActionStore>,
        timeout: Duration,
    ) -> Harness {
        let audit = Arc::new(InMemoryAuditStore::default());
        let audit_store: Arc<dyn AuditStore> = audit.clone();
        let executor = Arc::new(CapabilityExecutor::new(audit_store.clone()));
        let dispatcher = ActionDispatcher::new(
            Arc::new(CapabilityRegistry::builtin()),
            entity_store.clone(),
            actions.clone(),
            executor.clone(),
            timeout,
            16,
        );
        let handler =
            ConfirmationHandler::new(entity_store.clone(), actions, audit_store, executor, timeout);
        Harness { entity_store, audit, dispatcher, handler }
    }

    fn ctx(tenant: &str) -> TenantContext {
        TenantContext::new(
            TenantId::new(tenant).expect("tenant id"),
            UserId("U-1".to_string()),
            Role::Manager,
            None,
        )
    }

    fn repo(harness: &Harness, ctx: &TenantContext) -> ScopedRepository {
        ScopedRepository::new(harness.entity_store.clone(), ctx)
    }

    async fn seed_customer(harness: &Harness, ctx: &TenantContext, id: &str) {
        repo(harness, ctx)
            .create(
                EntityKind::Customer,
                NewEntity {
                    id: Some(EntityId(id.to_string())),
                    tenant_id: None,
                    payload: json!({"name": "Acme", "phone": "555-0100"}),
                },
            )
            .await
            .expect("seed customer");
    }

    async fn propose(
        harness: &Harness,
        ctx: &TenantContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> depot_core::domain::action::Action {
        let outcome = harness
            .dispatcher
            .dispatch(
                ctx,
                &ConversationId("conv-1".to_string()),
                vec![ToolCall { name: name.to_string(), arguments: arguments.to_string() }],
            )
            .await
            .expect("dispatch");
        outcome.proposed.into_iter().next().expect("one proposal")
    }

    #[tokio::test]
    async fn confirm_executes_stored_arguments_and_stamps_the_tenant() {
        let harness = memory_harness();
        let ctx = ctx("T-A");
        seed_customer(&harness, &ctx, "C-1").await;

        let proposal = propose(
            &harness,
            &ctx,
            "create_order",
            json!({"customer_id": "C-1", "lines": [{"item_id": "I-1", "quantity": 2}]}),
        )
        .await;

        let action =
            harness.handler.resolve(&ctx, &proposal.id, true).await.expect("confirm succeeds");

        assert_eq!(action.status, ActionStatus::Executed);
        assert!(action.executed_at.is_some());

        let orders =
            repo(&harness, &ctx).find_many(EntityKind::Order, Filter::default(), None).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].tenant_id, Some(TenantId::new("T-A").expect("tenant id")));

        // Decision entry plus the executor's entity-level entry.
        assert_eq!(harness.audit.entries().len(), 2);
    }

    #[tokio::test]
    async fn second_confirm_conflicts_and_does_not_duplicate_the_order() {
        let harness = memory_harness();
        let ctx = ctx("T-A");
        seed_customer(&harness, &ctx, "C-1").await;

        let proposal = propose(
            &harness,
            &ctx,
            "create_order",
            json!({"customer_id": "C-1", "lines": [{"item_id": "I-1", "quantity": 2}]}),
        )
        .await;

        harness.handler.resolve(&ctx, &proposal.id, true).await.expect("first confirm");
        let second = harness.handler.resolve(&ctx, &proposal.id, true).await;

        assert!(matches!(second, Err(ApplicationError::Conflict { .. })));

        let order_count =
            repo(&harness, &ctx).count(EntityKind::Order, Filter::default()).await.unwrap();
        assert_eq!(order_count, 1, "the side effect must occur exactly once");
    }

    #[tokio::test]
    async fn cancel_records_no_execution() {
        let harness = memory_harness();
        let ctx = ctx("T-A");
        seed_customer(&harness, &ctx, "C-1").await;

        let proposal = propose(
            &harness,
            &ctx,
            "create_order",
            json!({"customer_id": "C-1", "lines": [{"item_id": "I-1", "quantity": 2}]}),
        )
        .await;

        let action = harness.handler.resolve(&ctx, &proposal.id, false).await.expect("cancel");

        assert_eq!(action.status, ActionStatus::Cancelled);
        assert!(action.confirmed_at.is_some());
        assert!(action.executed_at.is_none());
        assert_eq!(repo(&harness, &ctx).count(EntityKind::Order, Filter::default()).await.unwrap(), 0);

        // Cancelling after cancelling conflicts too.
        let again = harness.handler.resolve(&ctx, &proposal.id, false).await;
        assert!(matches!(again, Err(ApplicationError::Conflict { .. })));
    }

    #[tokio::test]
    async fn failed_execution_is_recorded_on_the_action() {
        let harness = memory_harness();
        let ctx = ctx("T-A");
        // No customer seeded: the executor will reject the order.

        let proposal = propose(
            &harness,
            &ctx,
            "create_order",
            json!({"customer_id": "C-404", "lines": [{"item_id": "I-1", "quantity": 1}]}),
        )
        .await;

        let action = harness.handler.resolve(&ctx, &proposal.id, true).await.expect("resolve");

        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.error.as_deref().unwrap_or_default().contains("does not exist"));
    }

    #[tokio::test]
    async fn cross_tenant_confirmation_behaves_as_not_found() {
        let harness = memory_harness();
        let ctx_a = ctx("T-A");
        seed_customer(&harness, &ctx_a, "C-1").await;

        let proposal = propose(
            &harness,
            &ctx_a,
            "create_order",
            json!({"customer_id": "C-1", "lines": [{"item_id": "I-1", "quantity": 1}]}),
        )
        .await;

        let ctx_b = ctx("T-B");
        let result = harness.handler.resolve(&ctx_b, &proposal.id, true).await;

        assert!(matches!(result, Err(ApplicationError::ActionNotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_confirms_execute_exactly_once() {
        // Named shared-memory database so parallel tests cannot collide.
        let pool =
            connect_with_settings("sqlite:file:depot_confirm_race?mode=memory&cache=shared", 5, 30)
                .await
                .expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let harness = build_harness(
            Arc::new(SqlEntityStore::new(pool.clone())),
            Arc::new(SqlActionStore::new(pool.clone())),
            Duration::from_secs(5),
        );
        let ctx = ctx("T-A");
        seed_customer(&harness, &ctx, "C-1").await;

        let proposal = propose(
            &harness,
            &ctx,
            "create_order",
            json!({"customer_id": "C-1", "lines": [{"item_id": "I-1", "quantity": 2}]}),
        )
        .await;

        let (first, second) = tokio::join!(
            harness.handler.resolve(&ctx, &proposal.id, true),
            harness.handler.resolve(&ctx, &proposal.id, true),
        );

        let successes = [&first, &second].iter().filter(|result| result.is_ok()).count();
        let conflicts = [&first, &second]
            .iter()
            .filter(|result| matches!(result, Err(ApplicationError::Conflict { .. })))
            .count();
        assert_eq!(successes, 1, "exactly one decision must win");
        assert_eq!(conflicts, 1, "the loser must observe a conflict");

        let order_count =
            repo(&harness, &ctx).count(EntityKind::Order, Filter::default()).await.unwrap();
        assert_eq!(order_count, 1, "the underlying side effect must occur exactly once");

        pool.close().await;
    }

    #[tokio::test]
    async fn missed_deadline_records_timed_out() {
        let pool = connect_with_settings(
            "sqlite:file:depot_confirm_deadline?mode=memory&cache=shared",
            5,
            30,
        )
        .await
        .expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        // Dispatch with a generous deadline, then confirm with a zero
        // deadline so the execution cannot finish in time.
        let proposer = build_harness(
            Arc::new(SqlEntityStore::new(pool.clone())),
            Arc::new(SqlActionStore::new(pool.clone())),
            Duration::from_secs(5),
        );
        let ctx = ctx("T-A");
        seed_customer(&proposer, &ctx, "C-1").await;

        let proposal = propose(
            &proposer,
            &ctx,
            "create_order",
            json!({"customer_id": "C-1", "lines": [{"item_id": "I-1", "quantity": 1}]}),
        )
        .await;

        let confirmer = build_harness(
            Arc::new(SqlEntityStore::new(pool.clone())),
            Arc::new(SqlActionStore::new(pool.clone())),
            Duration::ZERO,
        );
        let action = confirmer.handler.resolve(&ctx, &proposal.id, true).await.expect("resolve");

        assert_eq!(action.status, ActionStatus::TimedOut);
        assert!(action.error.as_deref().unwrap_or_default().contains("deadline"));

        pool.close().await;
    }
}
