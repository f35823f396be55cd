/// HTTP API Layer
///
/// REST endpoints for workflow management, execution control, schedules, and
/// the worker-facing queue/stream surface. Handlers authenticate users by api
/// key; worker endpoints authenticate by the per-execution authorization
/// secret instead.

// Workflow CRUD, execution control, environments, cleanup
pub mod workflows;

// Schedule create/delete/list
pub mod schedules;

// Worker-facing queue poll/confirm and result streams
pub mod workers;

use crate::runtime::{
    EngineError, ExecutionPlanner, ExecutionQueue, ResultSink, ScheduleService, StatisticsSink,
};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{User, Workflow};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

/// Application state containing shared engine components
#[derive(Clone)]
pub struct AppState {
    /// Typed repositories over the entity store
    pub storage: WorkflowStorage,
    /// Execution planner
    pub planner: Arc<ExecutionPlanner>,
    /// Result sink and abort path
    pub sink: ResultSink,
    /// Per-environment worker queue
    pub queue: ExecutionQueue,
    /// Interval schedule service
    pub scheduler: Arc<ScheduleService>,
    /// Statistics counters (best-effort)
    pub stats: StatisticsSink,
    /// Cleanup window in days for the execution sweep
    pub cleanup_days: i64,
}

/// API error carrying the HTTP status and a wire-format reason
///
/// Every failure serializes as `{"success": false, "reason": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: String,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Not authenticated")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "Insufficient permissions")
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, reason)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "reason": self.reason }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            EngineError::AuthMismatch => StatusCode::UNAUTHORIZED,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Terminal(_) => StatusCode::CONFLICT,
            EngineError::PlanFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Storage failure in handler: {}", error);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error")
    }
}

/// Resolve the calling user from the Authorization header
///
/// Accepts `Authorization: Bearer <api_key>` (the bare key also works).
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let api_key = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
        .unwrap_or_default();

    match state.storage.user_by_api_key(api_key).await? {
        Some(user) => Ok(user),
        None => Err(ApiError::unauthorized()),
    }
}

/// Owner-or-admin check used by CRUD, abort, and history endpoints
pub fn owner_or_admin(user: &User, workflow: &Workflow) -> bool {
    user.role == "admin" || user.id == workflow.owner
}

/// Execute additionally admits the scheduler role and per-workflow grants
pub fn can_execute(user: &User, workflow: &Workflow) -> bool {
    owner_or_admin(user, workflow)
        || user.role == "scheduler"
        || user.role == format!("workflow_{}", workflow.id)
}

/// Schedule management admits the scheduler role
pub fn can_schedule(user: &User, workflow: &Workflow) -> bool {
    owner_or_admin(user, workflow) || user.role == "scheduler"
}
