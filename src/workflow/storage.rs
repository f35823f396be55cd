/// Typed repositories over the entity store
///
/// Every persisted kind the engine touches goes through here: workflows,
/// executions, per-environment queues, schedules, app auth, environments,
/// users, and statistics. Bodies are JSON; this layer owns the
/// (de)serialization so callers only see typed values.

use crate::store::Datastore;
use crate::workflow::types::{
    AppAuthenticationStorage, Environment, ExecutionRequestWrapper, ScheduleEntry, StatisticsItem,
    User, Workflow, WorkflowApp, WorkflowExecution,
};
use anyhow::Result;

const KIND_WORKFLOW: &str = "workflow";
const KIND_APP: &str = "workflowapp";
const KIND_QUEUE: &str = "workflowqueue";
const KIND_SCHEDULE: &str = "schedules";
const KIND_APP_AUTH: &str = "workflowappauth";
const KIND_ENVIRONMENT: &str = "environments";
const KIND_USER: &str = "users";
const KIND_STATISTICS: &str = "statistics";

/// Execution history page size for the per-workflow listing
const EXECUTION_HISTORY_LIMIT: i64 = 20;

/// Typed storage facade used by the planner, sink, queue, and API layers
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    store: Datastore,
}

impl WorkflowStorage {
    /// Create a new storage instance over an entity store
    pub fn new(store: Datastore) -> Self {
        Self { store }
    }

    // -- workflows ----------------------------------------------------------

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        match self.store.get(KIND_WORKFLOW, id).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let body = serde_json::to_string(workflow)?;
        self.store.put(KIND_WORKFLOW, &workflow.id, &body).await
    }

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        self.store
            .list(KIND_WORKFLOW)
            .await?
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        self.store.delete(KIND_WORKFLOW, id).await
    }

    // -- apps ----------------------------------------------------------------

    pub async fn get_app(&self, id: &str) -> Result<Option<WorkflowApp>> {
        match self.store.get(KIND_APP, id).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn save_app(&self, app: &WorkflowApp) -> Result<()> {
        let body = serde_json::to_string(app)?;
        self.store.put(KIND_APP, &app.id, &body).await
    }

    pub async fn list_apps(&self) -> Result<Vec<WorkflowApp>> {
        self.store
            .list(KIND_APP)
            .await?
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    // -- executions ---------------------------------------------------------

    pub async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        match self.store.get_execution(id).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Commit an execution. The stored copy is the source of truth; callers
    /// pass transient working copies and this put is the commit point.
    pub async fn set_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let body = serde_json::to_string(execution)?;
        self.store
            .put_execution(
                &execution.execution_id,
                &execution.workflow_id,
                execution.started_at,
                &body,
            )
            .await
    }

    /// Last 20 executions for a workflow, most recently started first
    pub async fn list_executions(&self, workflow_id: &str) -> Result<Vec<WorkflowExecution>> {
        self.store
            .executions_for_workflow(workflow_id, EXECUTION_HISTORY_LIMIT)
            .await?
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    /// Remove executions started before the cutoff (unix seconds)
    pub async fn cleanup_executions(&self, cutoff: i64) -> Result<u64> {
        self.store.delete_executions_before(cutoff).await
    }

    // -- per-environment queue ----------------------------------------------

    /// Queue wrapper for an environment; empty when none exists yet
    pub async fn get_queue(&self, environment: &str) -> Result<ExecutionRequestWrapper> {
        match self.store.get(KIND_QUEUE, environment).await? {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Ok(ExecutionRequestWrapper::default()),
        }
    }

    pub async fn set_queue(
        &self,
        environment: &str,
        wrapper: &ExecutionRequestWrapper,
    ) -> Result<()> {
        let body = serde_json::to_string(wrapper)?;
        self.store.put(KIND_QUEUE, environment, &body).await
    }

    // -- schedules ----------------------------------------------------------

    pub async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleEntry>> {
        match self.store.get(KIND_SCHEDULE, id).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn set_schedule(&self, schedule: &ScheduleEntry) -> Result<()> {
        let body = serde_json::to_string(schedule)?;
        self.store.put(KIND_SCHEDULE, &schedule.id, &body).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleEntry>> {
        self.store
            .list(KIND_SCHEDULE)
            .await?
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<bool> {
        self.store.delete(KIND_SCHEDULE, id).await
    }

    // -- app authentication --------------------------------------------------

    pub async fn get_app_auth(&self, id: &str) -> Result<Option<AppAuthenticationStorage>> {
        match self.store.get(KIND_APP_AUTH, id).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn list_app_auth(&self) -> Result<Vec<AppAuthenticationStorage>> {
        self.store
            .list(KIND_APP_AUTH)
            .await?
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    pub async fn save_app_auth(&self, auth: &AppAuthenticationStorage) -> Result<()> {
        let body = serde_json::to_string(auth)?;
        self.store.put(KIND_APP_AUTH, &auth.id, &body).await
    }

    pub async fn delete_app_auth(&self, id: &str) -> Result<bool> {
        self.store.delete(KIND_APP_AUTH, id).await
    }

    // -- environments --------------------------------------------------------

    pub async fn list_environments(&self) -> Result<Vec<Environment>> {
        self.store
            .list(KIND_ENVIRONMENT)
            .await?
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect()
    }

    pub async fn set_environment(&self, environment: &Environment) -> Result<()> {
        let body = serde_json::to_string(environment)?;
        self.store
            .put(KIND_ENVIRONMENT, &environment.name, &body)
            .await
    }

    // -- users ---------------------------------------------------------------

    pub async fn save_user(&self, user: &User) -> Result<()> {
        let body = serde_json::to_string(user)?;
        self.store.put(KIND_USER, &user.id, &body).await
    }

    /// Resolve an api key to its active user, if any
    pub async fn user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        if api_key.is_empty() {
            return Ok(None);
        }

        for body in self.store.list(KIND_USER).await? {
            let user: User = serde_json::from_str(&body)?;
            if user.active && user.api_key == api_key {
                return Ok(Some(user));
            }
        }

        Ok(None)
    }

    // -- statistics ----------------------------------------------------------

    pub async fn get_statistic(&self, fieldname: &str) -> Result<Option<StatisticsItem>> {
        match self.store.get(KIND_STATISTICS, fieldname).await? {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    pub async fn set_statistic(&self, item: &StatisticsItem) -> Result<()> {
        let body = serde_json::to_string(item)?;
        self.store.put(KIND_STATISTICS, &item.fieldname, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{ExecutionRequest, ExecutionStatus};

    async fn storage() -> WorkflowStorage {
        WorkflowStorage::new(Datastore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn workflow_round_trip() {
        let storage = storage().await;
        let workflow = Workflow {
            id: "wf-1".to_string(),
            name: "alerts".to_string(),
            is_valid: true,
            ..Workflow::default()
        };

        storage.save_workflow(&workflow).await.unwrap();
        let loaded = storage.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "alerts");
        assert!(loaded.is_valid);

        assert!(storage.delete_workflow("wf-1").await.unwrap());
        assert!(storage.get_workflow("wf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_round_trip_keeps_status_and_results() {
        let storage = storage().await;
        let mut execution = WorkflowExecution {
            execution_id: "e-1".to_string(),
            workflow_id: "wf-1".to_string(),
            started_at: 1234,
            status: ExecutionStatus::Executing,
            authorization: "secret".to_string(),
            ..WorkflowExecution::default()
        };
        execution.results.insert(crate::workflow::types::ActionResult {
            action: crate::workflow::types::Action {
                id: "a".to_string(),
                ..Default::default()
            },
            status: ExecutionStatus::Success,
            result: "done".to_string(),
            ..Default::default()
        });

        storage.set_execution(&execution).await.unwrap();
        let loaded = storage.get_execution("e-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Executing);
        assert_eq!(loaded.authorization, "secret");
        assert_eq!(loaded.results.get("a").unwrap().result, "done");
    }

    #[tokio::test]
    async fn app_round_trip() {
        let storage = storage().await;
        storage
            .save_app(&WorkflowApp {
                id: "app-1".to_string(),
                name: "Virustotal".to_string(),
                app_version: "1.0.0".to_string(),
                is_valid: true,
                ..WorkflowApp::default()
            })
            .await
            .unwrap();

        let app = storage.get_app("app-1").await.unwrap().unwrap();
        assert_eq!(app.name, "Virustotal");
        assert_eq!(storage.list_apps().await.unwrap().len(), 1);
        assert!(storage.get_app("app-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_queue_is_empty() {
        let storage = storage().await;
        let wrapper = storage.get_queue("onprem").await.unwrap();
        assert!(wrapper.data.is_empty());

        let wrapper = ExecutionRequestWrapper {
            data: vec![ExecutionRequest {
                execution_id: "e-1".to_string(),
                workflow_id: "wf-1".to_string(),
                ..ExecutionRequest::default()
            }],
        };
        storage.set_queue("onprem", &wrapper).await.unwrap();
        assert_eq!(storage.get_queue("onprem").await.unwrap().data.len(), 1);
    }

    #[tokio::test]
    async fn user_lookup_by_api_key_requires_active() {
        let storage = storage().await;
        storage
            .save_user(&User {
                id: "u-1".to_string(),
                username: "ops".to_string(),
                role: "admin".to_string(),
                api_key: "key-1".to_string(),
                active: true,
            })
            .await
            .unwrap();
        storage
            .save_user(&User {
                id: "u-2".to_string(),
                username: "gone".to_string(),
                role: "user".to_string(),
                api_key: "key-2".to_string(),
                active: false,
            })
            .await
            .unwrap();

        assert_eq!(
            storage.user_by_api_key("key-1").await.unwrap().unwrap().username,
            "ops"
        );
        assert!(storage.user_by_api_key("key-2").await.unwrap().is_none());
        assert!(storage.user_by_api_key("").await.unwrap().is_none());
    }
}
