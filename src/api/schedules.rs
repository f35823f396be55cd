/// Schedule management endpoints
///
/// Create and remove interval schedules for a workflow, and list the
/// persisted schedule entries. Owner, admin, and the scheduler role may
/// manage schedules.

use crate::api::{authenticate, can_schedule, ApiError, AppState};
use crate::workflow::types::{Schedule, ScheduleEntry};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};

/// Create schedule management routes
pub fn create_schedule_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/workflows/{id}/schedule", post(schedule_workflow))
        .route(
            "/api/v1/workflows/{id}/schedule/{schedule_id}",
            delete(stop_schedule),
        )
        .route("/api/v1/workflows/schedules", get(list_schedules))
}

/// Create a schedule for a workflow
///
/// POST /api/v1/workflows/{id}/schedule (body: Schedule)
async fn schedule_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let mut workflow = state
        .storage
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow {} doesn't exist", id)))?;
    if !can_schedule(&user, &workflow) {
        tracing::warn!("Wrong user ({}) for workflow {} (schedule)", user.username, id);
        return Err(ApiError::forbidden());
    }

    let schedule: Schedule = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid schedule: {}", e)))?;

    if schedule.id.len() != 36 {
        return Err(ApiError::bad_request("Invalid schedule id"));
    }
    if schedule.name.is_empty() {
        return Err(ApiError::bad_request("Schedule name can't be empty"));
    }
    if schedule.frequency.is_empty() {
        return Err(ApiError::bad_request("Frequency can't be empty"));
    }

    state
        .scheduler
        .create_schedule(&workflow, schedule.clone())
        .await?;

    // The workflow carries its schedules for the UI
    workflow.schedules.push(schedule);
    state.storage.save_workflow(&workflow).await?;

    Ok(Json(json!({ "success": true })))
}

/// Remove a schedule and stop its firings
///
/// DELETE /api/v1/workflows/{id}/schedule/{schedule_id}
async fn stop_schedule(
    State(state): State<AppState>,
    Path((id, schedule_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let mut workflow = state
        .storage
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow {} doesn't exist", id)))?;
    if !can_schedule(&user, &workflow) {
        return Err(ApiError::forbidden());
    }

    state.scheduler.delete_schedule(&schedule_id).await?;

    let before = workflow.schedules.len();
    workflow.schedules.retain(|schedule| schedule.id != schedule_id);
    if workflow.schedules.len() != before {
        state.storage.save_workflow(&workflow).await?;
    }

    Ok(Json(json!({ "success": true })))
}

/// List every persisted schedule
///
/// GET /api/v1/workflows/schedules
async fn list_schedules(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ScheduleEntry>>, ApiError> {
    authenticate(&state, &headers).await?;

    Ok(Json(state.storage.list_schedules().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{login, test_state};
    use crate::workflow::types::Workflow;
    use axum::http::StatusCode;

    fn workflow(owner: &str) -> Workflow {
        Workflow {
            id: "cc000000-0000-0000-0000-000000000001".to_string(),
            name: "nightly enrichment".to_string(),
            is_valid: true,
            owner: owner.to_string(),
            start: "a".to_string(),
            ..Workflow::default()
        }
    }

    fn schedule_body(id: &str, frequency: &str) -> String {
        json!({
            "id": id,
            "name": "every minute",
            "frequency": frequency,
            "execution_argument": "{}"
        })
        .to_string()
    }

    #[tokio::test]
    async fn schedule_lifecycle_via_endpoints() {
        let state = test_state().await;
        let headers = login(&state, "admin", "admin-key").await;
        let workflow = workflow("user-admin-key");
        state.storage.save_workflow(&workflow).await.unwrap();

        let schedule_id = "dd000000-0000-0000-0000-000000000001";
        let Json(response) = schedule_workflow(
            State(state.clone()),
            Path(workflow.id.clone()),
            headers.clone(),
            schedule_body(schedule_id, "60"),
        )
        .await
        .unwrap();
        assert_eq!(response["success"], true);

        // Persisted entry and workflow-embedded copy both exist
        assert!(state.storage.get_schedule(schedule_id).await.unwrap().is_some());
        let stored = state.storage.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(stored.schedules.len(), 1);

        let Json(listed) =
            list_schedules(State(state.clone()), headers.clone()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].seconds, 60);

        stop_schedule(
            State(state.clone()),
            Path((workflow.id.clone(), schedule_id.to_string())),
            headers.clone(),
        )
        .await
        .unwrap();
        assert!(state.storage.get_schedule(schedule_id).await.unwrap().is_none());
        let stored = state.storage.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert!(stored.schedules.is_empty());

        // Unknown schedule now
        let err = stop_schedule(
            State(state),
            Path((workflow.id.clone(), schedule_id.to_string())),
            headers,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cron_frequencies_are_rejected() {
        let state = test_state().await;
        let headers = login(&state, "admin", "admin-key").await;
        let workflow = workflow("user-admin-key");
        state.storage.save_workflow(&workflow).await.unwrap();

        let err = schedule_workflow(
            State(state.clone()),
            Path(workflow.id.clone()),
            headers,
            schedule_body("dd000000-0000-0000-0000-000000000002", "*/15 * * * *"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn plain_users_cannot_schedule_others_workflows() {
        let state = test_state().await;
        let headers = login(&state, "user", "plain-key").await;
        let workflow = workflow("someone-else");
        state.storage.save_workflow(&workflow).await.unwrap();

        let err = schedule_workflow(
            State(state),
            Path(workflow.id.clone()),
            headers,
            schedule_body("dd000000-0000-0000-0000-000000000003", "60"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
