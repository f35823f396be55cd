/// Worker-facing endpoints
///
/// On-prem workers poll their environment's queue (identified by the Org-Id
/// header), confirm entries they have picked up, post node results to the
/// stream endpoint, and fetch current execution state. Stream endpoints
/// authenticate solely by the per-execution authorization secret.

use crate::api::{ApiError, AppState};
use crate::workflow::types::{ActionResult, ExecutionRequestWrapper, WorkflowExecution};
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Worker fetch body for /api/v1/streams/results
#[derive(Debug, Default, Deserialize)]
struct ExecutionQuery {
    #[serde(default)]
    execution_id: String,
    #[serde(default)]
    authorization: String,
}

/// Create the worker-facing routes
pub fn create_worker_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/workflows/queue", get(get_workflow_queue))
        .route("/api/v1/workflows/queue/confirm", post(confirm_workflow_queue))
        .route("/api/v1/streams", post(handle_stream_result))
        .route("/api/v1/streams/results", post(get_stream_results))
}

/// Environment name from the Org-Id header
fn environment_header(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("Org-Id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Specify the org-id header."))
}

/// Worker poll: pending execution requests for an environment
///
/// GET /api/v1/workflows/queue (header Org-Id: <environment>)
async fn get_workflow_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ExecutionRequestWrapper>, ApiError> {
    let environment = environment_header(&headers)?;
    let wrapper = state.queue.poll(&environment).await?;

    if !wrapper.data.is_empty() {
        tracing::info!(
            "📋 {} pending execution requests for environment \"{}\"",
            wrapper.data.len(),
            environment
        );
    }

    Ok(Json(wrapper))
}

/// Worker ack: remove picked-up requests from the environment queue
///
/// POST /api/v1/workflows/queue/confirm (header Org-Id, body wrapper)
async fn confirm_workflow_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<&'static str, ApiError> {
    let environment = environment_header(&headers)?;

    let confirmed: ExecutionRequestWrapper = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid confirm body: {}", e)))?;
    if confirmed.data.is_empty() {
        return Err(ApiError::bad_request("No execution requests to confirm"));
    }

    let removed = state.queue.confirm(&environment, &confirmed.data).await?;
    tracing::debug!(
        "✅ Confirmed {} queue entries for environment \"{}\"",
        removed,
        environment
    );

    Ok("OK")
}

/// Worker result post: merge an ActionResult into its execution
///
/// POST /api/v1/streams
async fn handle_stream_result(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let action_result: ActionResult = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid ActionResult: {}", e)))?;

    state.sink.handle_result(action_result).await?;
    Ok(Json(json!({ "success": true })))
}

/// Worker fetch of the current execution state
///
/// POST /api/v1/streams/results (body: execution_id + authorization)
async fn get_stream_results(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let query: ExecutionQuery = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid body: {}", e)))?;

    let execution = state
        .sink
        .execution_for_worker(&query.execution_id, &query.authorization)
        .await?;

    Ok(Json(execution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::test_state;
    use crate::workflow::types::{Action, ExecutionRequest, ExecutionStatus, Workflow};
    use axum::http::StatusCode;

    fn org_headers(environment: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Org-Id", environment.parse().unwrap());
        headers
    }

    async fn seed_execution(state: &AppState) -> WorkflowExecution {
        let execution = WorkflowExecution {
            execution_id: "ee000000-0000-0000-0000-000000000001".to_string(),
            workflow_id: "wf-1".to_string(),
            authorization: "aa000000-0000-0000-0000-000000000001".to_string(),
            status: ExecutionStatus::Executing,
            started_at: 1000,
            workflow: Workflow {
                id: "wf-1".to_string(),
                actions: vec![Action {
                    id: "a".to_string(),
                    environment: "onprem".to_string(),
                    ..Action::default()
                }],
                ..Workflow::default()
            },
            ..WorkflowExecution::default()
        };
        state.storage.set_execution(&execution).await.unwrap();
        execution
    }

    #[tokio::test]
    async fn queue_poll_requires_org_id_header() {
        let state = test_state().await;

        let err = get_workflow_queue(State(state.clone()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let Json(wrapper) = get_workflow_queue(State(state), org_headers("onprem"))
            .await
            .unwrap();
        assert!(wrapper.data.is_empty());
    }

    #[tokio::test]
    async fn queue_confirm_round_trip() {
        let state = test_state().await;
        state
            .queue
            .enqueue(
                "onprem",
                ExecutionRequest {
                    execution_id: "e-1".to_string(),
                    workflow_id: "wf-1".to_string(),
                    ..ExecutionRequest::default()
                },
            )
            .await
            .unwrap();

        let body = r#"{"data": [{"execution_id": "e-1", "workflow_id": "wf-1"}]}"#;
        let ok = confirm_workflow_queue(State(state.clone()), org_headers("onprem"), body.to_string())
            .await
            .unwrap();
        assert_eq!(ok, "OK");
        assert!(state.queue.poll("onprem").await.unwrap().data.is_empty());

        // Empty confirmation lists are refused
        let err = confirm_workflow_queue(
            State(state),
            org_headers("onprem"),
            r#"{"data": []}"#.to_string(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_post_requires_matching_authorization() {
        let state = test_state().await;
        let execution = seed_execution(&state).await;

        let bad = json!({
            "execution_id": execution.execution_id,
            "authorization": "wrong",
            "action": {"id": "a"},
            "status": "SUCCESS",
            "result": "data"
        });
        let err = handle_stream_result(State(state.clone()), bad.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let good = json!({
            "execution_id": execution.execution_id,
            "authorization": execution.authorization,
            "action": {"id": "a"},
            "status": "SUCCESS",
            "result": "data"
        });
        let Json(response) = handle_stream_result(State(state.clone()), good.to_string())
            .await
            .unwrap();
        assert_eq!(response["success"], true);

        let stored = state
            .storage
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.results.get("a").unwrap().result, "data");
    }

    #[tokio::test]
    async fn stream_results_fetch_is_gated_by_the_execution_secret() {
        let state = test_state().await;
        let execution = seed_execution(&state).await;

        let bad = json!({
            "execution_id": execution.execution_id,
            "authorization": "wrong"
        });
        let err = get_stream_results(State(state.clone()), bad.to_string())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let good = json!({
            "execution_id": execution.execution_id,
            "authorization": execution.authorization
        });
        let Json(fetched) = get_stream_results(State(state), good.to_string())
            .await
            .unwrap();
        assert_eq!(fetched.execution_id, execution.execution_id);
    }
}
