/// Result sink: node result intake and execution state machine
///
/// Workers post ActionResults here. Each posting is authorized against the
/// execution's secret, merged into the results (unique per action id), and
/// drives the state transitions: skip propagation for failed subtrees,
/// premature-skip cleanup, and the termination check. Merges are
/// last-writer-wins per action id; worker retries are therefore idempotent.

use crate::runtime::error::{EngineError, EngineResult};
use crate::runtime::stats::StatisticsSink;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{ActionResult, ExecutionStatus, WorkflowExecution};

/// Result string for nodes whose EXECUTING state was overtaken by a terminal
/// transition
const ABORTED_UNKNOWN_ERROR: &str = "Aborted because of an unknown error";

/// Result string for descendants skipped by a failing ancestor
const SKIPPED_PREVIOUS_NODE: &str = "Skipped because of previous node";

/// Synthetic node name used by workers for user-input re-entries; such
/// results extend the expected result count of an execution
const USER_INPUT_APP: &str = "User Input";

#[derive(Debug, Clone)]
pub struct ResultSink {
    storage: WorkflowStorage,
    stats: StatisticsSink,
}

impl ResultSink {
    pub fn new(storage: WorkflowStorage, stats: StatisticsSink) -> Self {
        Self { storage, stats }
    }

    /// Accept a worker-posted ActionResult and advance the execution
    ///
    /// Terminal executions reject postings, except that an aborted/failed
    /// execution with exit_on_error disabled keeps draining results
    /// best-effort.
    pub async fn handle_result(
        &self,
        action_result: ActionResult,
    ) -> EngineResult<WorkflowExecution> {
        let mut execution = self
            .storage
            .get_execution(&action_result.execution_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "Failed getting execution ID {} because it doesn't exist.",
                    action_result.execution_id
                ))
            })?;

        if execution.authorization != action_result.authorization {
            tracing::warn!(
                "🔒 Bad authorization key when updating node {} of execution {}",
                action_result.action.id,
                action_result.execution_id
            );
            return Err(EngineError::AuthMismatch);
        }

        if execution.status == ExecutionStatus::Finished {
            return Err(EngineError::Terminal(format!(
                "Workflowexecution is already finished because of {} with status {}",
                execution.last_node,
                execution.status.as_str()
            )));
        }
        if execution.status.is_terminal() {
            if execution.workflow.configuration.exit_on_error {
                return Err(EngineError::Terminal(format!(
                    "Workflowexecution is aborted because of {} with result {} and status {}",
                    execution.last_node,
                    execution.result,
                    execution.status.as_str()
                )));
            }
            tracing::info!(
                "Continuing {} even though it's {}",
                execution.execution_id,
                execution.status.as_str()
            );
        }

        if matches!(
            action_result.status,
            ExecutionStatus::Aborted | ExecutionStatus::Failure
        ) {
            self.apply_terminal_result(&mut execution, &action_result);
        }

        self.merge_result(&mut execution, action_result.clone());

        let graph = WorkflowGraph::new(&execution.workflow);
        Self::remove_premature_skips(&mut execution, &graph);
        self.check_termination(&mut execution, &graph, &action_result);

        self.storage.set_execution(&execution).await?;
        Ok(execution)
    }

    /// Explicit abort of an in-flight execution
    pub async fn abort_execution(&self, execution_id: &str) -> EngineResult<WorkflowExecution> {
        let mut execution = self.storage.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::NotFound(format!(
                "Failed getting execution ID {} because it doesn't exist (abort).",
                execution_id
            ))
        })?;

        if execution.status.is_terminal() {
            return Err(EngineError::Terminal(format!(
                "Status for {} is {}, which can't be aborted.",
                execution_id,
                execution.status.as_str()
            )));
        }

        execution.completed_at = chrono::Utc::now().timestamp();
        execution.status = ExecutionStatus::Aborted;

        let mut last_result = String::new();
        execution.results.for_each_mut(|result| {
            if result.status == ExecutionStatus::Executing {
                result.status = ExecutionStatus::Aborted;
                result.result = ABORTED_UNKNOWN_ERROR.to_string();
            }
            if !result.result.is_empty() {
                last_result = result.result.clone();
            }
        });
        if execution.result.is_empty() {
            execution.result = last_result;
        }

        self.storage.set_execution(&execution).await?;
        self.stats
            .increment("workflow_executions_aborted", &execution.workflow.id, 1);

        tracing::info!("🛑 Aborted execution {}", execution_id);
        Ok(execution)
    }

    /// Worker fetch of the current execution state, gated on the execution
    /// secret. Not-found and bad-key deliberately share one message.
    pub async fn execution_for_worker(
        &self,
        execution_id: &str,
        authorization: &str,
    ) -> EngineResult<WorkflowExecution> {
        let execution = self.storage.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::NotFound(
                "Bad authorization key or execution_id might not exist.".to_string(),
            )
        })?;

        if execution.authorization != authorization {
            return Err(EngineError::AuthMismatch);
        }

        Ok(execution)
    }

    /// A posted ABORTED/FAILURE result: terminate the run (exit_on_error) or
    /// propagate skips through the failed subtree.
    fn apply_terminal_result(&self, execution: &mut WorkflowExecution, posted: &ActionResult) {
        tracing::info!(
            "⚠️ Node {} of {} reported {}",
            posted.action.id,
            execution.execution_id,
            posted.status.as_str()
        );

        // Any node still EXECUTING was overtaken; remember the last
        // non-empty result seen while rewriting.
        let mut last_result = String::new();
        execution.results.for_each_mut(|result| {
            if result.status == ExecutionStatus::Executing {
                result.status = posted.status;
                result.result = ABORTED_UNKNOWN_ERROR.to_string();
            }
            if !result.result.is_empty() {
                last_result = result.result.clone();
            }
        });
        execution.result = last_result;

        if execution.workflow.configuration.exit_on_error {
            execution.status = posted.status;
            execution.last_node = posted.action.id.clone();

            let stat = match posted.status {
                ExecutionStatus::Aborted => "workflow_executions_aborted",
                _ => "workflow_executions_failure",
            };
            self.stats.increment(stat, &execution.workflow.id, 1);
            return;
        }

        // Skip every descendant whose incoming branches all originate inside
        // the failed subtree. A descendant with a live parent outside the
        // subtree stays eligible and is resolved later by its own results.
        let graph = WorkflowGraph::new(&execution.workflow);
        let descendants = graph.reachable_from(&posted.action.id);
        for node_id in &descendants {
            if node_id == &posted.action.id || execution.results.contains(node_id) {
                continue;
            }
            let Some(action) = execution
                .workflow
                .actions
                .iter()
                .find(|action| &action.id == node_id)
            else {
                continue;
            };

            let fully_inside = graph
                .parents(node_id)
                .iter()
                .all(|parent| descendants.contains(parent));
            if !fully_inside {
                tracing::debug!("Not setting node {} to SKIPPED: live parent outside subtree", node_id);
                continue;
            }

            execution.results.insert(ActionResult {
                action: action.clone(),
                execution_id: execution.execution_id.clone(),
                authorization: execution.authorization.clone(),
                result: SKIPPED_PREVIOUS_NODE.to_string(),
                started_at: 0,
                completed_at: 0,
                status: ExecutionStatus::Skipped,
            });
            self.stats
                .increment("workflow_execution_actions_skipped", &execution.workflow.id, 1);
        }
    }

    /// Merge the posted result (replace-by-action-id) and update any bound
    /// execution variable.
    fn merge_result(&self, execution: &mut WorkflowExecution, posted: ActionResult) {
        if let Some(binding) = posted
            .action
            .execution_variable
            .as_ref()
            .filter(|variable| !variable.name.is_empty())
        {
            if let Some(variable) = execution
                .execution_variables
                .iter_mut()
                .find(|variable| variable.name == binding.name)
            {
                tracing::debug!(
                    "Setting execution variable {} from node {}",
                    binding.name,
                    posted.action.id
                );
                variable.value = posted.result.clone();
            }
        }

        let action_id = posted.action.id.clone();
        let status = posted.status;
        match execution.results.insert(posted) {
            Some(previous) => tracing::info!(
                "Updating {} in {} from {} to {}",
                action_id,
                execution.execution_id,
                previous.status.as_str(),
                status.as_str()
            ),
            None => tracing::info!(
                "Setting value of {} in {} to {}",
                action_id,
                execution.execution_id,
                status.as_str()
            ),
        }
    }

    /// Drop SKIPPED entries that have a live parent: the skip was premature
    /// (seeded or propagated before the parent's real outcome arrived).
    fn remove_premature_skips(execution: &mut WorkflowExecution, graph: &WorkflowGraph) {
        let premature: Vec<String> = execution
            .results
            .iter()
            .filter(|result| result.status == ExecutionStatus::Skipped)
            .filter(|result| {
                graph.parents(&result.action.id).iter().any(|parent| {
                    execution
                        .results
                        .get(parent)
                        .map(|parent_result| {
                            !matches!(
                                parent_result.status,
                                ExecutionStatus::Skipped | ExecutionStatus::Failure
                            )
                        })
                        .unwrap_or(false)
                })
            })
            .map(|result| result.action.id.clone())
            .collect();

        for action_id in premature {
            tracing::debug!("Removing premature SKIPPED result for {}", action_id);
            execution.results.remove(&action_id);
        }
    }

    /// The execution completes once every expected node holds a settled
    /// result. Synthetic user-input re-entries raise the expected count.
    fn check_termination(
        &self,
        execution: &mut WorkflowExecution,
        graph: &WorkflowGraph,
        posted: &ActionResult,
    ) {
        let extra_inputs = execution
            .results
            .iter()
            .filter(|result| {
                result.action.name == USER_INPUT_APP && result.action.app_name == USER_INPUT_APP
            })
            .count();
        let expected = execution.workflow.actions.len() + extra_inputs;
        if execution.results.len() != expected {
            return;
        }

        let mut finished = true;
        let mut last_result = String::new();
        for result in execution.results.iter() {
            if result.status == ExecutionStatus::Executing {
                finished = false;
                break;
            }

            // A skipped node only settles once every resolved parent is
            // itself skipped or failed.
            if result.status == ExecutionStatus::Skipped {
                let settled = graph.parents(&result.action.id).iter().all(|parent| {
                    execution
                        .results
                        .get(parent)
                        .map(|parent_result| {
                            matches!(
                                parent_result.status,
                                ExecutionStatus::Skipped | ExecutionStatus::Failure
                            )
                        })
                        .unwrap_or(true)
                });
                if !settled {
                    finished = false;
                    break;
                }
            }

            if !result.result.is_empty() {
                last_result = result.result.clone();
            }
        }

        if !finished {
            return;
        }

        tracing::info!("🎉 Execution {} finished", execution.execution_id);
        execution.result = last_result;
        if !execution.status.is_terminal() {
            execution.status = ExecutionStatus::Finished;
            self.stats
                .increment("workflow_executions_success", &execution.workflow.id, 1);
        }
        execution.completed_at = chrono::Utc::now().timestamp();
        if execution.last_node.is_empty() {
            execution.last_node = posted.action.id.clone();
        }
    }
}
