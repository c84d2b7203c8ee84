//! Agent integration endpoints.
//!
//! The externally documented contract:
//! - `POST /agent/dispatch` submits a batch of capability calls
//! - `POST /agent/confirm` decides one pending action
//! - `GET /agent/actions` lists tenant-scoped conversation history
//! - `GET /agent/capabilities` serves the static capability catalog
//!
//! The tenant context is rebuilt per request from the authenticated
//! session headers. Authentication itself is an upstream concern; a
//! request without a usable tenant header fails closed with 400.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use depot_agent::{ActionDispatcher, ConfirmationHandler, ToolCall};
use depot_core::capability::CapabilityRegistry;
use depot_core::domain::action::{Action, ActionId, ConversationId};
use depot_core::domain::tenant::{BranchId, Role, TenantContext, TenantId, UserId};
use depot_core::errors::ApplicationError;
use depot_db::actions::ActionStore;

pub const TENANT_HEADER: &str = "x-depot-tenant";
pub const USER_HEADER: &str = "x-depot-user";
pub const ROLE_HEADER: &str = "x-depot-role";
pub const BRANCH_HEADER: &str = "x-depot-branch";

#[derive(Clone)]
pub struct AgentApiState {
    pub registry: Arc<CapabilityRegistry>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub confirmation: Arc<ConfirmationHandler>,
    pub actions: Arc<dyn ActionStore>,
}

pub fn router(state: AgentApiState) -> Router {
    Router::new()
        .route("/agent/dispatch", post(dispatch))
        .route("/agent/confirm", post(confirm))
        .route("/agent/actions", get(list_actions))
        .route("/agent/capabilities", get(capabilities))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub conversation_id: String,
    pub calls: Vec<ToolCallDto>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallDto {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub executed_actions: Vec<ActionDto>,
    pub proposed_actions: Vec<ActionDto>,
    pub denied_calls: u32,
    pub dropped_calls: u32,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub action_id: String,
    pub confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionDto {
    pub id: String,
    pub capability_name: String,
    pub status: String,
    pub proposed_arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<Action> for ActionDto {
    fn from(action: Action) -> Self {
        let proposed_arguments = serde_json::from_str(&action.arguments_json)
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        let executed_result =
            action.result_json.as_deref().and_then(|raw| serde_json::from_str(raw).ok());

        Self {
            id: action.id.0,
            capability_name: action.capability_name,
            status: action.status.as_str().to_string(),
            proposed_arguments,
            executed_result,
            error_message: action.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error: message.into() }))
}

/// Rebuild the per-request identity from the session headers, failing
/// closed when the tenant cannot be established.
fn tenant_context(headers: &HeaderMap) -> Result<TenantContext, (StatusCode, Json<ApiError>)> {
    let header = |name: &str| {
        headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|value| {
            !value.is_empty()
        })
    };

    let tenant_id = header(TENANT_HEADER)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "missing tenant header"))
        .and_then(|raw| {
            TenantId::new(raw)
                .map_err(|error| error_response(StatusCode::BAD_REQUEST, error.to_string()))
        })?;

    let user_id = header(USER_HEADER)
        .map(|raw| UserId(raw.to_string()))
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "missing user header"))?;

    let role = header(ROLE_HEADER)
        .and_then(Role::parse)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "missing or unknown role header"))?;

    let branch_id = header(BRANCH_HEADER).map(|raw| BranchId(raw.to_string()));

    Ok(TenantContext::new(tenant_id, user_id, role, branch_id))
}

fn application_error_status(error: &ApplicationError) -> StatusCode {
    match error {
        ApplicationError::Conflict { .. } => StatusCode::CONFLICT,
        ApplicationError::ActionNotFound(_) => StatusCode::NOT_FOUND,
        ApplicationError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
        ApplicationError::Domain(_) => StatusCode::BAD_REQUEST,
        ApplicationError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        ApplicationError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn dispatch(
    State(state): State<AgentApiState>,
    headers: HeaderMap,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, (StatusCode, Json<ApiError>)> {
    let ctx = tenant_context(&headers)?;
    let conversation_id = ConversationId(request.conversation_id);
    let calls: Vec<ToolCall> = request
        .calls
        .into_iter()
        .map(|call| ToolCall { name: call.name, arguments: call.arguments })
        .collect();

    let outcome = state
        .dispatcher
        .dispatch(&ctx, &conversation_id, calls)
        .await
        .map_err(|error| error_response(application_error_status(&error), error.to_string()))?;

    tracing::info!(
        event_name = "agent.dispatch.completed",
        tenant_id = %ctx.tenant_id,
        conversation_id = %conversation_id.0,
        executed = outcome.executed.len(),
        proposed = outcome.proposed.len(),
        denied = outcome.denied_calls,
        dropped = outcome.dropped_calls,
        "dispatch completed"
    );

    Ok(Json(DispatchResponse {
        executed_actions: outcome.executed.into_iter().map(ActionDto::from).collect(),
        proposed_actions: outcome.proposed.into_iter().map(ActionDto::from).collect(),
        denied_calls: outcome.denied_calls,
        dropped_calls: outcome.dropped_calls,
    }))
}

pub async fn confirm(
    State(state): State<AgentApiState>,
    headers: HeaderMap,
    Json(request): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<ConfirmResponse>), (StatusCode, Json<ApiError>)> {
    let ctx = tenant_context(&headers)?;
    let action_id = ActionId(request.action_id);

    match state.confirmation.resolve(&ctx, &action_id, request.confirmed).await {
        Ok(action) => Ok((
            StatusCode::OK,
            Json(ConfirmResponse {
                success: true,
                action: Some(ActionDto::from(action)),
                error: None,
            }),
        )),
        // Decision conflicts are part of the endpoint contract, not
        // transport failures: the caller gets success=false with detail.
        Err(error @ ApplicationError::Conflict { .. })
        | Err(error @ ApplicationError::ActionNotFound(_)) => Ok((
            application_error_status(&error),
            Json(ConfirmResponse { success: false, action: None, error: Some(error.to_string()) }),
        )),
        Err(error) => {
            Err(error_response(application_error_status(&error), error.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListActionsQuery {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct ListActionsResponse {
    pub actions: Vec<ActionDto>,
}

/// Conversation history for operator reconciliation: a crash between
/// execute and persist leaves an action in `confirmed`, and this listing
/// is where that surfaces.
pub async fn list_actions(
    State(state): State<AgentApiState>,
    headers: HeaderMap,
    Query(query): Query<ListActionsQuery>,
) -> Result<Json<ListActionsResponse>, (StatusCode, Json<ApiError>)> {
    let ctx = tenant_context(&headers)?;
    let conversation_id = ConversationId(query.conversation_id);

    let actions = state
        .actions
        .list_for_conversation(&ctx.tenant_id, &conversation_id)
        .await
        .map_err(|error| {
            error_response(StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        })?;

    Ok(Json(ListActionsResponse {
        actions: actions.into_iter().map(ActionDto::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct CapabilityDto {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub allowed_roles: Vec<String>,
    pub read_only: bool,
}

pub async fn capabilities(State(state): State<AgentApiState>) -> Json<Vec<CapabilityDto>> {
    let entries = state
        .registry
        .catalog()
        .into_iter()
        .map(|capability| CapabilityDto {
            name: capability.name.clone(),
            description: capability.description.clone(),
            parameter_schema: capability.parameter_schema.clone(),
            allowed_roles: capability
                .allowed_roles
                .iter()
                .map(|role| role.as_str().to_string())
                .collect(),
            read_only: capability.read_only,
        })
        .collect();

    Json(entries)
}
