/// Fire-and-forget statistics counters
///
/// Append-only counters keyed by field name ("workflow_executions",
/// "workflow_executions_aborted", ...). Updates run on detached tasks and
/// never surface errors to the caller; a missing counter is initialized on
/// first increment.

use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{StatisticsData, StatisticsItem};

#[derive(Debug, Clone)]
pub struct StatisticsSink {
    storage: WorkflowStorage,
}

impl StatisticsSink {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self { storage }
    }

    /// Increment a counter in the background; failures are only logged
    pub fn increment(&self, fieldname: &str, id: &str, amount: i64) {
        let storage = self.storage.clone();
        let fieldname = fieldname.to_string();
        let id = id.to_string();

        tokio::spawn(async move {
            if let Err(e) = apply_increment(&storage, &fieldname, &id, amount).await {
                tracing::warn!("📊 Failed updating statistic {}: {}", fieldname, e);
            }
        });
    }

    /// Synchronous variant used by tests to observe the committed value
    pub async fn increment_now(&self, fieldname: &str, id: &str, amount: i64) {
        if let Err(e) = apply_increment(&self.storage, fieldname, id, amount).await {
            tracing::warn!("📊 Failed updating statistic {}: {}", fieldname, e);
        }
    }
}

async fn apply_increment(
    storage: &WorkflowStorage,
    fieldname: &str,
    id: &str,
    amount: i64,
) -> anyhow::Result<()> {
    let entry = StatisticsData {
        timestamp: chrono::Utc::now().timestamp(),
        amount,
        id: id.to_string(),
    };

    let mut item = storage
        .get_statistic(fieldname)
        .await?
        .unwrap_or_else(|| StatisticsItem {
            total: 0,
            fieldname: fieldname.to_string(),
            data: Vec::new(),
        });

    item.total += amount;
    item.data.push(entry);
    storage.set_statistic(&item).await
}
