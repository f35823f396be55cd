/// Interval schedule service
///
/// Re-fires workflow executions at a fixed cadence using tokio-cron-scheduler.
/// Frequencies are plain intervals in seconds; cron expressions are rejected.
/// Job handles are tracked in a guarded map keyed by schedule id so deletion
/// can unschedule them, and persisted schedules are re-armed on startup.

use crate::runtime::error::{EngineError, EngineResult};
use crate::runtime::planner::{ExecutionPlanner, StartParams};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{Schedule, ScheduleEntry, Workflow};
use anyhow::Result;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Schedule service driving the planner at workflow-defined intervals
pub struct ScheduleService {
    scheduler: RwLock<JobScheduler>,
    /// Job handles by schedule id, for removal on delete
    jobs: RwLock<HashMap<String, Uuid>>,
    storage: WorkflowStorage,
    planner: Arc<ExecutionPlanner>,
}

impl ScheduleService {
    pub async fn new(storage: WorkflowStorage, planner: Arc<ExecutionPlanner>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow::anyhow!("Failed creating job scheduler: {}", e))?;

        Ok(Self {
            scheduler: RwLock::new(scheduler),
            jobs: RwLock::new(HashMap::new()),
            storage,
            planner,
        })
    }

    /// Re-arm persisted schedules and start firing
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting schedule service");

        let schedules = self.storage.list_schedules().await?;
        let count = schedules.len();
        for entry in schedules {
            if let Err(e) = self.arm(&entry).await {
                tracing::error!("❌ Failed re-arming schedule {}: {}", entry.id, e);
            }
        }

        {
            let scheduler = self.scheduler.read().await;
            scheduler
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("Failed starting job scheduler: {}", e))?;
        }

        tracing::info!("✅ Schedule service started with {} schedules", count);
        Ok(())
    }

    /// Create a schedule for a workflow and begin firing it
    ///
    /// The start node is the branch destination of the schedule trigger when
    /// one exists, the workflow's start node otherwise.
    pub async fn create_schedule(
        &self,
        workflow: &Workflow,
        schedule: Schedule,
    ) -> EngineResult<()> {
        let seconds = parse_frequency(&schedule.frequency)?;

        let start_node = workflow
            .branches
            .iter()
            .find(|branch| branch.source_id == schedule.id)
            .map(|branch| branch.destination_id.clone())
            .unwrap_or_else(|| workflow.start.clone());

        let now = chrono::Utc::now().timestamp();
        let entry = ScheduleEntry {
            id: schedule.id.clone(),
            workflow_id: workflow.id.clone(),
            start_node: start_node.clone(),
            argument: schedule.execution_argument.clone(),
            wrapped_argument: wrap_argument(&start_node, &schedule.execution_argument),
            seconds,
            creation_time: now,
            last_modification_time: now,
            last_runtime: now,
        };

        self.arm(&entry).await?;
        self.storage.set_schedule(&entry).await?;

        tracing::info!(
            "⏰ Schedule {} armed for workflow {} every {}s from node {}",
            entry.id,
            entry.workflow_id,
            entry.seconds,
            entry.start_node
        );
        Ok(())
    }

    /// Remove a schedule: delete the persisted entry and stop the job
    pub async fn delete_schedule(&self, schedule_id: &str) -> EngineResult<()> {
        self.storage.delete_schedule(schedule_id).await?;

        let handle = self.jobs.write().await.remove(schedule_id);
        match handle {
            Some(job_id) => {
                let scheduler = self.scheduler.read().await;
                scheduler.remove(&job_id).await.map_err(|e| {
                    EngineError::Store(anyhow::anyhow!("Failed stopping schedule: {}", e))
                })?;
                tracing::info!("🗑️ Stopped schedule {}", schedule_id);
                Ok(())
            }
            None => Err(EngineError::NotFound("schedule not found".to_string())),
        }
    }

    /// Register the repeated job for a schedule entry
    async fn arm(&self, entry: &ScheduleEntry) -> EngineResult<()> {
        let planner = Arc::clone(&self.planner);
        let workflow_id = entry.workflow_id.clone();
        let start_node = entry.start_node.clone();
        let argument = escape_argument(&entry.argument);
        let interval = Duration::from_secs(entry.seconds.max(1) as u64);

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let planner = Arc::clone(&planner);
            let workflow_id = workflow_id.clone();
            let start_node = start_node.clone();
            let argument = argument.clone();

            Box::pin(async move {
                tracing::debug!("🔔 Schedule fired for workflow {}", workflow_id);

                let params = StartParams {
                    start: Some(start_node),
                    execution_source: Some("schedule".to_string()),
                    execution_argument: Some(argument),
                    ..StartParams::default()
                };

                match planner.plan(&workflow_id, None, params).await {
                    Ok(outcome) => tracing::info!(
                        "🚀 Scheduled execution {} started for workflow {}",
                        outcome.execution().execution_id,
                        workflow_id
                    ),
                    Err(e) => {
                        tracing::error!("❌ Failed to execute {}: {}", workflow_id, e)
                    }
                }
            })
        })
        .map_err(|e| EngineError::Store(anyhow::anyhow!("Failed creating scheduled job: {}", e)))?;

        let job_id = {
            let scheduler = self.scheduler.write().await;
            scheduler
                .add(job)
                .await
                .map_err(|e| EngineError::Store(anyhow::anyhow!("Failed scheduling job: {}", e)))?
        };

        self.jobs.write().await.insert(entry.id.clone(), job_id);
        Ok(())
    }
}

/// Parse a schedule frequency: an integer interval in seconds (>= 1).
/// Cron-looking strings are refused.
fn parse_frequency(frequency: &str) -> EngineResult<i64> {
    if frequency.split('*').count() > 5 {
        return Err(EngineError::InputInvalid(
            "cron not supported - use an interval in seconds".to_string(),
        ));
    }

    let seconds: i64 = frequency.trim().parse().map_err(|_| {
        EngineError::InputInvalid(format!("Failed to parse frequency \"{}\"", frequency))
    })?;

    if seconds < 1 {
        return Err(EngineError::InputInvalid(
            "Frequency has to be more than 0".to_string(),
        ));
    }

    Ok(seconds)
}

/// The planner-shaped body a firing schedule submits
fn wrap_argument(start_node: &str, argument: &str) -> String {
    format!(
        r#"{{"start": "{}", "execution_source": "schedule", "execution_argument": "{}"}}"#,
        start_node,
        escape_argument(argument)
    )
}

fn escape_argument(argument: &str) -> String {
    argument.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::planner::LocalImageBuilder;
    use crate::runtime::queue::ExecutionQueue;
    use crate::runtime::stats::StatisticsSink;
    use crate::store::Datastore;

    #[test]
    fn frequency_must_be_a_positive_interval() {
        assert_eq!(parse_frequency("60").unwrap(), 60);
        assert_eq!(parse_frequency(" 1 ").unwrap(), 1);

        assert!(matches!(
            parse_frequency("*/15 * * * *"),
            Err(EngineError::InputInvalid(_))
        ));
        assert!(matches!(parse_frequency("0"), Err(EngineError::InputInvalid(_))));
        assert!(matches!(parse_frequency("-5"), Err(EngineError::InputInvalid(_))));
        assert!(matches!(
            parse_frequency("often"),
            Err(EngineError::InputInvalid(_))
        ));
    }

    #[test]
    fn wrapped_argument_escapes_quotes() {
        let wrapped = wrap_argument("node-1", r#"{"ip": "10.0.0.1"}"#);
        assert_eq!(
            wrapped,
            r#"{"start": "node-1", "execution_source": "schedule", "execution_argument": "{\"ip\": \"10.0.0.1\"}"}"#
        );
    }

    async fn service() -> (ScheduleService, WorkflowStorage) {
        let storage = WorkflowStorage::new(Datastore::in_memory().await.unwrap());
        let planner = Arc::new(ExecutionPlanner::new(
            storage.clone(),
            ExecutionQueue::new(storage.clone()),
            Arc::new(LocalImageBuilder),
            StatisticsSink::new(storage.clone()),
            "conflux".to_string(),
        ));
        let service = ScheduleService::new(storage.clone(), planner).await.unwrap();
        (service, storage)
    }

    fn schedule_workflow() -> Workflow {
        Workflow {
            id: "wf-1".to_string(),
            is_valid: true,
            start: "a".to_string(),
            ..Workflow::default()
        }
    }

    #[tokio::test]
    async fn create_persists_and_delete_removes() {
        let (service, storage) = service().await;
        let workflow = schedule_workflow();

        let schedule = Schedule {
            id: "5c4a8b10-0000-0000-0000-000000000001".to_string(),
            name: "hourly sweep".to_string(),
            frequency: "3600".to_string(),
            execution_argument: "{}".to_string(),
        };
        service.create_schedule(&workflow, schedule.clone()).await.unwrap();

        let entry = storage.get_schedule(&schedule.id).await.unwrap().unwrap();
        assert_eq!(entry.seconds, 3600);
        assert_eq!(entry.start_node, "a");
        assert_eq!(entry.workflow_id, "wf-1");

        service.delete_schedule(&schedule.id).await.unwrap();
        assert!(storage.get_schedule(&schedule.id).await.unwrap().is_none());

        // Second delete has no handle left
        let err = service.delete_schedule(&schedule.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn cron_frequency_is_rejected_before_anything_persists() {
        let (service, storage) = service().await;
        let workflow = schedule_workflow();

        let schedule = Schedule {
            id: "5c4a8b10-0000-0000-0000-000000000002".to_string(),
            name: "cron attempt".to_string(),
            frequency: "* * * * *".to_string(),
            execution_argument: String::new(),
        };
        let err = service.create_schedule(&workflow, schedule.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::InputInvalid(_)));
        assert!(storage.get_schedule(&schedule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restart_rearms_persisted_schedules() {
        let (service, storage) = service().await;
        let workflow = schedule_workflow();

        let schedule = Schedule {
            id: "5c4a8b10-0000-0000-0000-000000000003".to_string(),
            name: "rearm me".to_string(),
            frequency: "60".to_string(),
            execution_argument: String::new(),
        };
        service.create_schedule(&workflow, schedule.clone()).await.unwrap();
        drop(service);

        // Fresh service over the same store: start() re-arms, so delete
        // finds a live handle
        let planner = Arc::new(ExecutionPlanner::new(
            storage.clone(),
            ExecutionQueue::new(storage.clone()),
            Arc::new(LocalImageBuilder),
            StatisticsSink::new(storage.clone()),
            "conflux".to_string(),
        ));
        let service = ScheduleService::new(storage.clone(), planner).await.unwrap();
        service.start().await.unwrap();
        service.delete_schedule(&schedule.id).await.unwrap();
    }
}
