/// Workflow management and execution control endpoints
///
/// CRUD on workflow definitions plus the execution surface: start (plan),
/// history, abort, environments, and the execution cleanup sweep. All
/// endpoints authenticate by api key; execution additionally admits the
/// scheduler role and per-workflow grants.

use crate::api::{authenticate, can_execute, owner_or_admin, ApiError, AppState};
use crate::runtime::StartParams;
use crate::workflow::types::{AppAuthenticationStorage, AuthenticationUsage, Workflow};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Create workflow management and execution routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workflows",
            get(list_workflows).post(create_workflow),
        )
        .route(
            "/api/v1/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route(
            "/api/v1/workflows/{id}/execute",
            get(execute_workflow).post(execute_workflow),
        )
        .route(
            "/api/v1/workflows/{id}/executions",
            get(get_workflow_executions),
        )
        .route(
            "/api/v1/workflows/{id}/executions/{execution_id}/abort",
            get(abort_execution),
        )
        .route("/api/v1/apps", get(list_apps))
        .route("/api/v1/getenvironments", get(get_environments))
        .route("/api/v1/execution_cleanup", get(cleanup_executions))
}

/// Load a workflow or fail with 404
async fn load_workflow(state: &AppState, id: &str) -> Result<Workflow, ApiError> {
    state
        .storage
        .get_workflow(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow {} doesn't exist", id)))
}

/// List workflows owned by the caller (admins see everything)
///
/// GET /api/v1/workflows
async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let workflows = state
        .storage
        .list_workflows()
        .await?
        .into_iter()
        .filter(|workflow| owner_or_admin(&user, workflow))
        .collect();

    Ok(Json(workflows))
}

/// Create a new workflow owned by the caller
///
/// POST /api/v1/workflows (body: Workflow)
async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Workflow>, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let mut workflow: Workflow = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid workflow: {}", e)))?;
    if workflow.name.is_empty() {
        return Err(ApiError::bad_request("Workflow name can't be empty"));
    }

    workflow.id = Uuid::new_v4().to_string();
    workflow.owner = user.id.clone();

    state.storage.save_workflow(&workflow).await?;
    tracing::info!("📋 Created workflow {} ({})", workflow.id, workflow.name);

    Ok(Json(workflow))
}

/// Fetch a single workflow
///
/// GET /api/v1/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Workflow>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let workflow = load_workflow(&state, &id).await?;

    if !owner_or_admin(&user, &workflow) {
        return Err(ApiError::forbidden());
    }

    Ok(Json(workflow))
}

/// Save a workflow and refresh advisory app-auth usage references
///
/// PUT /api/v1/workflows/{id} (body: Workflow)
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Workflow>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let existing = load_workflow(&state, &id).await?;
    if !owner_or_admin(&user, &existing) {
        return Err(ApiError::forbidden());
    }

    let mut workflow: Workflow = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid workflow: {}", e)))?;
    workflow.id = id;
    workflow.owner = existing.owner;

    state.storage.save_workflow(&workflow).await?;
    update_auth_usage(&state, &workflow).await?;

    tracing::info!("📋 Saved workflow {} ({})", workflow.id, workflow.name);
    Ok(Json(workflow))
}

/// Rebuild the usage references for every auth the workflow touches
async fn update_auth_usage(state: &AppState, workflow: &Workflow) -> Result<(), ApiError> {
    // Nodes grouped by the auth they reference
    let mut nodes_by_auth: HashMap<&str, Vec<String>> = HashMap::new();
    for action in &workflow.actions {
        if !action.authentication_id.is_empty() {
            nodes_by_auth
                .entry(action.authentication_id.as_str())
                .or_default()
                .push(action.id.clone());
        }
    }

    for mut auth in state.storage.list_app_auth().await? {
        let before = usage_fingerprint(&auth);
        auth.usage.retain(|usage| usage.workflow_id != workflow.id);

        if let Some(nodes) = nodes_by_auth.get(auth.id.as_str()) {
            auth.usage.push(AuthenticationUsage {
                workflow_id: workflow.id.clone(),
                nodes: nodes.clone(),
            });
        }

        if usage_fingerprint(&auth) != before {
            auth.workflow_count = auth.usage.len() as i64;
            auth.node_count = auth.usage.iter().map(|usage| usage.nodes.len() as i64).sum();
            state.storage.save_app_auth(&auth).await?;
        }
    }

    Ok(())
}

fn usage_fingerprint(auth: &AppAuthenticationStorage) -> Vec<(String, usize)> {
    auth.usage
        .iter()
        .map(|usage| (usage.workflow_id.clone(), usage.nodes.len()))
        .collect()
}

/// Delete a workflow
///
/// DELETE /api/v1/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let workflow = load_workflow(&state, &id).await?;
    if !owner_or_admin(&user, &workflow) {
        return Err(ApiError::forbidden());
    }

    state.storage.delete_workflow(&id).await?;
    tracing::info!("🗑️ Deleted workflow {}", id);

    Ok(Json(json!({ "success": true })))
}

/// Plan and start an execution
///
/// GET/POST /api/v1/workflows/{id}/execute
/// Query (GET): start, reference_execution, answer, note
/// Body (POST): ExecutionRequest-shaped JSON, or a raw payload used as the
/// execution argument
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let workflow = load_workflow(&state, &id).await?;
    if !can_execute(&user, &workflow) {
        tracing::warn!("Wrong user ({}) for workflow {} (execute)", user.username, id);
        return Err(ApiError::forbidden());
    }

    let params = if method == Method::POST {
        StartParams::from_post_body(&body)
    } else {
        StartParams {
            start: query.get("start").cloned(),
            reference_execution: query.get("reference_execution").cloned(),
            answer: query.get("answer").cloned(),
            note: query.get("note").cloned(),
            ..StartParams::default()
        }
    };

    tracing::info!("▶️ Starting execution of {}", id);
    let outcome = state.planner.plan(&id, Some(workflow), params).await?;
    let execution = outcome.execution();

    Ok(Json(json!({
        "success": true,
        "execution_id": execution.execution_id,
        "authorization": execution.authorization,
    })))
}

/// Execution history: last 20 runs, most recently started first
///
/// GET /api/v1/workflows/{id}/executions
async fn get_workflow_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let workflow = load_workflow(&state, &id).await?;
    if !owner_or_admin(&user, &workflow) {
        return Err(ApiError::forbidden());
    }

    let executions = state.storage.list_executions(&id).await?;
    Ok(Json(serde_json::to_value(executions).map_err(|e| {
        ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed unpacking workflow executions: {}", e),
        )
    })?))
}

/// Abort an in-flight execution
///
/// GET /api/v1/workflows/{id}/executions/{execution_id}/abort
async fn abort_execution(
    State(state): State<AppState>,
    Path((id, execution_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let workflow = load_workflow(&state, &id).await?;
    if !owner_or_admin(&user, &workflow) {
        return Err(ApiError::forbidden());
    }

    state.sink.abort_execution(&execution_id).await?;

    Ok(Json(json!({ "success": true })))
}

/// List the app catalog
///
/// GET /api/v1/apps
async fn list_apps(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers).await?;

    let apps = state.storage.list_apps().await?;
    Ok(Json(json!(apps)))
}

/// List worker environments
///
/// GET /api/v1/getenvironments
async fn get_environments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers).await?;

    let environments = state.storage.list_environments().await?;
    Ok(Json(json!(environments)))
}

/// Remove executions older than the configured window
///
/// GET /api/v1/execution_cleanup
async fn cleanup_executions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers).await?;

    let cutoff = chrono::Utc::now().timestamp() - state.cleanup_days * 24 * 60 * 60;
    let removed = state.storage.cleanup_executions(cutoff).await?;
    tracing::info!("🧹 Removed {} executions older than {} days", removed, state.cleanup_days);

    Ok(Json(json!({ "success": true, "removed": removed })))
}
