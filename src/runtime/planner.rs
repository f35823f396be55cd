/// Execution planner
///
/// Turns an execution request for a workflow graph into a committed
/// WorkflowExecution plus queued work for on-prem workers. The planner
/// resolves the request mode (new run, continuation of a reference
/// execution, user-input cancellation, alternate start node), prunes nodes
/// unreachable from the start node, injects stored app credentials into
/// action parameters, and enqueues one ExecutionRequest per distinct
/// non-cloud environment.

use crate::runtime::error::{EngineError, EngineResult};
use crate::runtime::queue::ExecutionQueue;
use crate::runtime::stats::StatisticsSink;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{
    ActionResult, AppAuthenticationStorage, ExecutionRequest, ExecutionResults, ExecutionStatus,
    Workflow, WorkflowExecution, CLOUD_ENVIRONMENT,
};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Result string seeded for nodes pruned by reachability
const SKIPPED_NOT_UNDER_STARTNODE: &str = "Skipped because it's not under the startnode";

/// External collaborator preparing worker app images before dispatch
///
/// Planning fails when the builder does; no execution is created and nothing
/// is queued.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn ensure_images(&self, images: &[String]) -> anyhow::Result<()>;
}

/// Default builder for single-node deployments: workers pull images
/// themselves, so preflight just logs what will be needed.
#[derive(Debug, Default)]
pub struct LocalImageBuilder;

#[async_trait]
impl ImageBuilder for LocalImageBuilder {
    async fn ensure_images(&self, images: &[String]) -> anyhow::Result<()> {
        if !images.is_empty() {
            tracing::debug!("🐳 Images required for execution: {:?}", images);
        }
        Ok(())
    }
}

/// Normalized execution request, assembled by the HTTP layer from either
/// query parameters (GET) or an ExecutionRequest-shaped body (POST), and by
/// the scheduler when a schedule fires.
#[derive(Debug, Clone, Default)]
pub struct StartParams {
    pub start: Option<String>,
    pub execution_id: Option<String>,
    pub execution_argument: Option<String>,
    pub execution_source: Option<String>,
    pub reference_execution: Option<String>,
    pub answer: Option<String>,
    pub note: Option<String>,
}

impl StartParams {
    /// Build params from a POST body
    ///
    /// The body is parsed as an ExecutionRequest; unparseable bodies (or
    /// bodies without a start node) are carried verbatim as the execution
    /// argument, so triggers can post raw payloads.
    pub fn from_post_body(body: &str) -> Self {
        let parsed: ExecutionRequest = serde_json::from_str(body).unwrap_or_default();

        let mut params = StartParams::default();
        if parsed.start.is_empty() && !body.is_empty() {
            params.execution_argument = Some(body.to_string());
            return params;
        }

        if !parsed.start.is_empty() {
            params.start = Some(parsed.start);
        }
        if !parsed.execution_id.is_empty() {
            params.execution_id = Some(parsed.execution_id);
        }
        if !parsed.execution_argument.is_empty() {
            params.execution_argument = Some(parsed.execution_argument);
        }
        if !parsed.execution_source.is_empty() {
            params.execution_source = Some(parsed.execution_source);
        }
        params
    }
}

/// What planning produced
#[derive(Debug)]
pub enum PlanOutcome {
    /// A committed EXECUTING execution with queued worker requests
    Started(WorkflowExecution),
    /// A user-input cancellation resolved against a reference execution;
    /// nothing was queued
    Cancelled(WorkflowExecution),
}

impl PlanOutcome {
    pub fn execution(&self) -> &WorkflowExecution {
        match self {
            Self::Started(execution) | Self::Cancelled(execution) => execution,
        }
    }
}

/// Plans executions and feeds the per-environment queues
#[derive(Clone)]
pub struct ExecutionPlanner {
    storage: WorkflowStorage,
    queue: ExecutionQueue,
    images: Arc<dyn ImageBuilder>,
    stats: StatisticsSink,
    base_image_name: String,
}

impl ExecutionPlanner {
    pub fn new(
        storage: WorkflowStorage,
        queue: ExecutionQueue,
        images: Arc<dyn ImageBuilder>,
        stats: StatisticsSink,
        base_image_name: String,
    ) -> Self {
        Self {
            storage,
            queue,
            images,
            stats,
            base_image_name,
        }
    }

    /// Plan and start an execution of a workflow
    ///
    /// A pre-loaded workflow snapshot may be passed to skip the storage read;
    /// it is used only when its id matches.
    pub async fn plan(
        &self,
        workflow_id: &str,
        workflow: Option<Workflow>,
        params: StartParams,
    ) -> EngineResult<PlanOutcome> {
        let workflow = match workflow {
            Some(workflow) if workflow.id == workflow_id && !workflow.id.is_empty() => workflow,
            _ => self
                .storage
                .get_workflow(workflow_id)
                .await?
                .ok_or_else(|| {
                    EngineError::NotFound(format!("Workflow {} doesn't exist", workflow_id))
                })?,
        };

        if !workflow.is_valid {
            tracing::warn!("⛔ Stopped execution as workflow {} is not valid", workflow.id);
            return Err(EngineError::PlanFailure(format!(
                "workflow {} is invalid",
                workflow.id
            )));
        }

        // User-input cancellation: resolve the reference execution and stop
        if params.answer.as_deref() == Some("false") {
            if let (Some(reference), Some(start)) = (&params.reference_execution, &params.start) {
                return self
                    .cancel_user_input(&workflow, reference, start, params.note.as_deref())
                    .await;
            }
        }

        let mut execution = WorkflowExecution {
            workflow: workflow.clone(),
            ..WorkflowExecution::default()
        };

        // Continuation keeps the old execution wholesale: its id, its
        // authorization, and its workflow snapshot.
        let mut make_new = true;
        if let Some(reference) = &params.reference_execution {
            let old = self.storage.get_execution(reference).await?.ok_or_else(|| {
                EngineError::NotFound(format!(
                    "Failed getting execution ID {} because it doesn't exist.",
                    reference
                ))
            })?;
            tracing::info!("🔁 Continuing execution {} for workflow {}", reference, workflow.id);
            execution = old;
            make_new = false;
        } else if let Some(execution_id) = &params.execution_id {
            execution.execution_id = execution_id.clone();
        }

        if execution.execution_id.is_empty() {
            execution.execution_id = Uuid::new_v4().to_string();
        }
        if execution.execution_id.len() != 36 {
            return Err(EngineError::InputInvalid("Invalid uuid".to_string()));
        }

        if let Some(argument) = &params.execution_argument {
            execution.execution_argument = argument.clone();
        }
        if let Some(source) = &params.execution_source {
            execution.execution_source = source.clone();
        }
        if let Some(start) = &params.start {
            execution.start = start.clone();
        }

        if make_new {
            execution.execution_type = "workflow".to_string();
            execution.workflow_id = workflow.id.clone();
            execution.started_at = chrono::Utc::now().timestamp();
            execution.completed_at = 0;
            execution.authorization = Uuid::new_v4().to_string();
        }
        // One authorization per execution lifetime; continuations keep it.
        if execution.authorization.is_empty() {
            execution.authorization = Uuid::new_v4().to_string();
        }
        if execution.started_at == 0 {
            execution.started_at = chrono::Utc::now().timestamp();
        }
        execution.status = ExecutionStatus::Executing;

        if execution.execution_source.is_empty() {
            execution.execution_source = "default".to_string();
        }
        execution.execution_variables = workflow.execution_variables.clone();

        if execution.start.is_empty() {
            execution.start = execution.workflow.start.clone();
        }

        let start = execution.start.clone();
        if !execution.workflow.actions.iter().any(|a| a.id == start) {
            return Err(EngineError::PlanFailure(format!(
                "Workflow start node {} doesn't exist",
                start
            )));
        }

        let graph = WorkflowGraph::new(&execution.workflow);
        let reachable = graph.reachable_from(&start);

        // Walk every action: require an environment, inject stored
        // credentials, and pre-seed SKIPPED results for nodes the start
        // node can't reach.
        let needs_auth = execution
            .workflow
            .actions
            .iter()
            .any(|action| !action.authentication_id.is_empty());
        let all_auths: Vec<AppAuthenticationStorage> = if needs_auth {
            self.storage.list_app_auth().await?
        } else {
            Vec::new()
        };

        let mut seeded = ExecutionResults::new();
        let start_from_top = execution.workflow.configuration.start_from_top;

        let actions = std::mem::take(&mut execution.workflow.actions);
        let mut new_actions = Vec::with_capacity(actions.len());
        for mut action in actions {
            if action.environment.is_empty() {
                return Err(EngineError::PlanFailure(format!(
                    "Environment is not defined for {}",
                    action.name
                )));
            }

            if !action.authentication_id.is_empty() {
                let auth = all_auths
                    .iter()
                    .find(|auth| auth.id == action.authentication_id)
                    .ok_or_else(|| {
                        EngineError::PlanFailure(format!(
                            "Auth ID {} doesn't exist",
                            action.authentication_id
                        ))
                    })?;

                for param in &mut action.parameters {
                    if let Some(field) = auth.fields.iter().find(|field| field.key == param.name) {
                        param.value = field.value.clone();
                    }
                }
            }

            if !start_from_top && action.id != start && !reachable.contains(&action.id) {
                tracing::debug!(
                    "⏭️ Seeding {} as SKIPPED: not a child of startnode {}",
                    action.id,
                    start
                );
                seeded.insert(ActionResult {
                    action: action.clone(),
                    execution_id: execution.execution_id.clone(),
                    authorization: execution.authorization.clone(),
                    result: SKIPPED_NOT_UNDER_STARTNODE.to_string(),
                    started_at: 0,
                    completed_at: 0,
                    status: ExecutionStatus::Skipped,
                });
            }

            new_actions.push(action);
        }
        execution.workflow.actions = new_actions;
        execution.results = seeded;

        // Distinct worker environments; "cloud" never reaches the queue
        let mut environments: Vec<String> = Vec::new();
        let mut image_names: Vec<String> = Vec::new();
        for action in &execution.workflow.actions {
            if action.environment != CLOUD_ENVIRONMENT {
                image_names.push(format!(
                    "{}:{}_{}",
                    self.base_image_name,
                    action.app_name.replace(' ', "-"),
                    action.app_version
                ));
                if !environments.contains(&action.environment) {
                    environments.push(action.environment.clone());
                }
            }
        }

        self.images.ensure_images(&image_names).await.map_err(|e| {
            tracing::error!("❌ Failed building required images {:?}: {}", image_names, e);
            EngineError::PlanFailure("Failed building missing app images".to_string())
        })?;

        self.storage.set_execution(&execution).await?;

        // Queue writes are best-effort; the committed execution is the
        // ground truth workers reconcile against.
        for environment in &environments {
            tracing::info!(
                "🚀 Execution {} queued for environment \"{}\"",
                execution.execution_id,
                environment
            );
            let request = ExecutionRequest {
                execution_id: execution.execution_id.clone(),
                workflow_id: execution.workflow.id.clone(),
                authorization: execution.authorization.clone(),
                environments: environments.clone(),
                ..ExecutionRequest::default()
            };
            if let Err(e) = self.queue.enqueue(environment, request).await {
                tracing::error!("Failed queueing to environment {}: {}", environment, e);
            }
        }

        self.stats.increment("workflow_executions", &workflow.id, 1);

        Ok(PlanOutcome::Started(execution))
    }

    /// Resolve a user-input prompt answered with "false": record the refusal
    /// on the prompting node, terminate the reference execution, and skip
    /// dispatch entirely.
    async fn cancel_user_input(
        &self,
        workflow: &Workflow,
        reference: &str,
        start: &str,
        note: Option<&str>,
    ) -> EngineResult<PlanOutcome> {
        let mut execution = self.storage.get_execution(reference).await?.ok_or_else(|| {
            EngineError::NotFound(format!(
                "Failed getting execution ID {} because it doesn't exist.",
                reference
            ))
        })?;

        if execution.workflow.id != workflow.id {
            return Err(EngineError::InputInvalid(format!("Bad ID {}", reference)));
        }

        if let Some(mut result) = execution.results.get(start).cloned() {
            result.result = match note {
                Some(note) => format!("User note: {}", note),
                None => "User clicked false".to_string(),
            };
            result.completed_at = chrono::Utc::now().timestamp();
            result.status = ExecutionStatus::Aborted;

            execution.status = result.status;
            execution.result = result.result.clone();
            execution.last_node = result.action.id.clone();
            execution.results.insert(result);
        }

        self.storage.set_execution(&execution).await?;
        tracing::info!("🛑 User input cancelled execution {}", reference);

        Ok(PlanOutcome::Cancelled(execution))
    }
}
