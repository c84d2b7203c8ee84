use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use depot_core::capability::{CapabilityLookup, CapabilityRegistry};
use depot_core::domain::action::{Action, ActionId, ActionStatus, ConversationId};
use depot_core::domain::tenant::TenantContext;
use depot_core::errors::ApplicationError;
use depot_core::idempotency::IdempotencyKey;
use depot_db::actions::ActionStore;
use depot_db::scoped::ScopedRepository;
use depot_db::store::EntityStore;

use crate::executor::CapabilityExecutor;
use crate::llm::ToolCall;

/// Result of one dispatch request: terminal read-only actions, proposals
/// awaiting confirmation, and counters for the calls that produced no
/// action row. Denied and dropped calls are counted separately so an
/// integration can tell a role problem from a capability-name problem.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub executed: Vec<Action>,
    pub proposed: Vec<Action>,
    pub denied_calls: u32,
    pub dropped_calls: u32,
}

/// Routes requested operations either to immediate execution (read-only)
/// or to a pending proposal (writes). Never mutates tenant-owned entities
/// for write-classified capabilities; those wait for the confirmation
/// handler.
pub struct ActionDispatcher {
    registry: Arc<CapabilityRegistry>,
    entity_store: Arc<dyn EntityStore>,
    actions: Arc<dyn ActionStore>,
    executor: Arc<CapabilityExecutor>,
    execution_timeout: Duration,
    max_calls_per_dispatch: usize,
}

impl ActionDispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        entity_store: Arc<dyn EntityStore>,
        actions: Arc<dyn ActionStore>,
        executor: Arc<CapabilityExecutor>,
        execution_timeout: Duration,
        max_calls_per_dispatch: u32,
    ) -> Self {
        Self {
            registry,
            entity_store,
            actions,
            executor,
            execution_timeout,
            max_calls_per_dispatch: max_calls_per_dispatch as usize,
        }
    }

    pub async fn dispatch(
        &self,
        ctx: &TenantContext,
        conversation_id: &ConversationId,
        mut calls: Vec<ToolCall>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        if calls.len() > self.max_calls_per_dispatch {
            tracing::warn!(
                event_name = "agent.dispatch.calls_truncated",
                requested = calls.len(),
                accepted = self.max_calls_per_dispatch,
                "dispatch request exceeded the per-request call budget"
            );
            calls.truncate(self.max_calls_per_dispatch);
        }

        let mut outcome = DispatchOutcome::default();

        for call in calls {
            let capability = match self.registry.lookup(&call.name, ctx.role) {
                CapabilityLookup::Authorized(capability) => capability,
                CapabilityLookup::RoleDenied { capability, role } => {
                    tracing::warn!(
                        event_name = "agent.dispatch.role_denied",
                        capability = %capability.name,
                        role = role.as_str(),
                        "capability invocation denied by role"
                    );
                    outcome.denied_calls += 1;
                    continue;
                }
                CapabilityLookup::Unknown => {
                    // Deliberately dropped, not failed: the upstream model
                    // can emit garbage names and the conversation must
                    // survive it. Counted so integrations can notice.
                    tracing::warn!(
                        event_name = "agent.dispatch.unknown_capability",
                        capability = %call.name,
                        "unknown capability dropped"
                    );
                    outcome.dropped_calls += 1;
                    continue;
                }
            };

            let arguments = parse_arguments(&call.name, &call.arguments);
            let key = IdempotencyKey::derive(&ctx.user_id, &capability.name, &arguments);
            let now = Utc::now();

            let mut action = Action {
                id: ActionId(Uuid::new_v4().to_string()),
                conversation_id: conversation_id.clone(),
                tenant_id: ctx.tenant_id.clone(),
                user_id: ctx.user_id.clone(),
                capability_name: capability.name.clone(),
                arguments_json: arguments.to_string(),
                result_json: None,
                error: None,
                idempotency_key: key,
                status: ActionStatus::Proposed,
                confirmed_at: None,
                executed_at: None,
                created_at: now,
                updated_at: now,
            };

            if capability.read_only {
                let repo = ScopedRepository::new(self.entity_store.clone(), ctx);
                let executed = tokio::time::timeout(
                    self.execution_timeout,
                    self.executor.execute(ctx, &repo, &capability.name, &arguments),
                )
                .await;

                match executed {
                    Ok(Ok(output)) => {
                        action.status = ActionStatus::Executed;
                        action.result_json = Some(output.result.to_string());
                    }
                    Ok(Err(error)) => {
                        action.status = ActionStatus::Failed;
                        action.error = Some(error.to_string());
                    }
                    Err(_elapsed) => {
                        action.status = ActionStatus::TimedOut;
                        action.error = Some("capability execution deadline exceeded".to_string());
                    }
                }
                action.confirmed_at = Some(now);
                action.executed_at = Some(now);
            }

            let stored = self
                .actions
                .insert(action)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

            // A collapsed duplicate may come back in any state; route it
            // by what it actually is, not by what this call wanted.
            if stored.status == ActionStatus::Proposed {
                outcome.proposed.push(stored);
            } else {
                outcome.executed.push(stored);
            }
        }

        Ok(outcome)
    }
}

/// Malformed argument strings degrade to an empty object rather than
/// rejecting the call; the capability's own argument validation runs at
/// execution time.
fn parse_arguments(capability: &str, raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            tracing::warn!(
                event_name = "agent.dispatch.malformed_arguments",
                capability = %capability,
                "argument string was not a JSON object; degrading to empty arguments"
            );
            json!({})
        }
    }
}
