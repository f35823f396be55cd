/// Core workflow and execution type definitions
///
/// Defines the graph model (workflows, actions, branches, triggers) and the
/// per-run execution model (executions, action results, queue requests).
/// These types are the wire format spoken by workers and the UI, so field
/// names follow the established JSON contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment name reserved for cloud-side execution; never queued to workers
pub const CLOUD_ENVIRONMENT: &str = "cloud";

/// Status of an execution or of a single action result
///
/// FINISHED, ABORTED and FAILURE are terminal for a whole execution; once
/// reached, the status never transitions back to EXECUTING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Executing,
    Finished,
    Aborted,
    Failure,
    Success,
    Skipped,
}

impl ExecutionStatus {
    /// Terminal statuses absorb: only the final result stays writable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executing => "EXECUTING",
            Self::Finished => "FINISHED",
            Self::Aborted => "ABORTED",
            Self::Failure => "FAILURE",
            Self::Success => "SUCCESS",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// A complete workflow definition: a directed graph of actions
///
/// The engine treats workflows as immutable during an execution; every
/// execution carries its own snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub configuration: WorkflowConfiguration,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default start node id; must reference an action
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub workflow_variables: Vec<WorkflowVariable>,
    #[serde(default)]
    pub execution_variables: Vec<WorkflowVariable>,
}

/// Failure semantics for a workflow
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    /// First FAILURE/ABORTED result terminates the whole execution
    #[serde(default)]
    pub exit_on_error: bool,
    /// Disables pruning of nodes unreachable from the start node
    #[serde(default)]
    pub start_from_top: bool,
}

/// A node in the workflow graph, bound to an app action at a given version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(rename = "isStartNode", default)]
    pub is_start_node: bool,
    #[serde(default)]
    pub label: String,
    /// Worker pool executing this node; "cloud" is reserved
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
    /// When set, the node's result is copied into the named execution variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_variable: Option<WorkflowVariable>,
    /// References an AppAuthentication entry whose fields are injected at plan time
    #[serde(default)]
    pub authentication_id: String,
}

/// A single parameter of an action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParameter {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub example: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub action_field: String,
    /// STATIC_VALUE, or a reference variant resolved by the worker
    #[serde(default)]
    pub variant: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub configuration: bool,
    #[serde(default)]
    pub schema: SchemaDefinition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(rename = "type", default)]
    pub schema_type: String,
}

/// Directed edge between two nodes
///
/// Conditions are evaluated by the worker, not the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub destination_id: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub has_errors: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Worker-evaluated branch condition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub condition: ActionParameter,
    #[serde(default)]
    pub source: ActionParameter,
    #[serde(default)]
    pub destination: ActionParameter,
}

/// An event source attached to a workflow (webhook, schedule, mail...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(rename = "isStartNode", default)]
    pub is_start_node: bool,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub trigger_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

/// A named variable carried by a workflow or an execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowVariable {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Schedule request body as embedded in a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub name: String,
    /// Interval in seconds; cron strings are rejected
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub execution_argument: String,
    #[serde(default)]
    pub id: String,
}

/// Persisted schedule state, re-armed on startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub start_node: String,
    /// Raw execution argument as supplied at creation
    #[serde(default)]
    pub argument: String,
    /// The planner-shaped request body fired at each interval
    #[serde(default)]
    pub wrapped_argument: String,
    pub seconds: i64,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default)]
    pub last_modification_time: i64,
    #[serde(default)]
    pub last_runtime: i64,
}

/// A worker-posted result for one node of an execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub authorization: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: i64,
    #[serde(default)]
    pub status: ExecutionStatus,
}

/// Per-run state object created by the planner and advanced by the result sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowExecution {
    #[serde(rename = "type", default)]
    pub execution_type: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    /// Start node for this run; may differ from workflow.start on partial reruns
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub execution_argument: String,
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub execution_source: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub last_node: String,
    /// Per-execution worker secret; set at creation, never mutated
    #[serde(default)]
    pub authorization: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: i64,
    /// Immutable snapshot of the workflow at plan time
    #[serde(default)]
    pub workflow: Workflow,
    #[serde(default)]
    pub results: ExecutionResults,
    #[serde(default)]
    pub execution_variables: Vec<WorkflowVariable>,
}

/// Results of an execution, unique per action id
///
/// Observably a JSON array in insertion order, internally a map keyed by
/// action id so merges replace in place instead of scanning. Later postings
/// for the same action replace the earlier entry at its original position.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResults {
    order: Vec<String>,
    entries: HashMap<String, ActionResult>,
}

impl ExecutionResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.entries.contains_key(action_id)
    }

    pub fn get(&self, action_id: &str) -> Option<&ActionResult> {
        self.entries.get(action_id)
    }

    /// Merge a result: replaces an existing entry for the same action in
    /// place, appends otherwise. Returns the replaced entry, if any.
    pub fn insert(&mut self, result: ActionResult) -> Option<ActionResult> {
        let action_id = result.action.id.clone();
        let previous = self.entries.insert(action_id.clone(), result);
        if previous.is_none() {
            self.order.push(action_id);
        }
        previous
    }

    pub fn remove(&mut self, action_id: &str) -> Option<ActionResult> {
        let removed = self.entries.remove(action_id);
        if removed.is_some() {
            self.order.retain(|id| id != action_id);
        }
        removed
    }

    /// Results in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ActionResult> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    /// Apply a mutation to every result, in insertion order
    pub fn for_each_mut<F: FnMut(&mut ActionResult)>(&mut self, mut f: F) {
        for id in &self.order {
            if let Some(result) = self.entries.get_mut(id) {
                f(result);
            }
        }
    }
}

impl FromIterator<ActionResult> for ExecutionResults {
    fn from_iter<T: IntoIterator<Item = ActionResult>>(iter: T) -> Self {
        let mut results = Self::new();
        for result in iter {
            results.insert(result);
        }
        results
    }
}

impl Serialize for ExecutionResults {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ExecutionResults {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let results = Vec::<ActionResult>::deserialize(deserializer)?;
        Ok(results.into_iter().collect())
    }
}

/// Queue entry telling a worker to begin work for an execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub execution_argument: String,
    #[serde(default)]
    pub execution_source: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub authorization: String,
    #[serde(default)]
    pub start: String,
}

/// The per-environment queue body: an ordered sequence of requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequestWrapper {
    #[serde(default)]
    pub data: Vec<ExecutionRequest>,
}

/// An app in the catalog; actions bind to an app action at a version
///
/// The catalog import pipeline lives outside the engine. The engine only
/// reads apps for validation and image preflight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowApp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub owner: String,
}

/// Stored app credentials, injected into action parameters at plan time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppAuthenticationStorage {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub fields: Vec<AuthenticationField>,
    /// Advisory reference counting, maintained by the workflow save path
    #[serde(default)]
    pub usage: Vec<AuthenticationUsage>,
    #[serde(default)]
    pub workflow_count: i64,
    #[serde(default)]
    pub node_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationField {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticationUsage {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Named worker pool; actions reference environments by name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A user of the management API, resolved from an api key
///
/// Roles: "admin", "user", "scheduler", or "workflow_<id>" for per-workflow
/// execute grants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub active: bool,
}

/// Append-only counter, one per statistic field name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsItem {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub fieldname: String,
    #[serde(default)]
    pub data: Vec<StatisticsData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsData {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub id: String,
}
