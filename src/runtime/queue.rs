/// Per-environment execution queue
///
/// A mailbox of pending ExecutionRequests per environment name. Workers poll
/// the full wrapper and confirm entries once started; delivery is
/// at-least-once. Enqueue/confirm are read-modify-write on a single stored
/// wrapper and last-writer-wins; the planner is the only enqueuer and the
/// execution record stays the ground truth.

use crate::runtime::error::EngineResult;
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{ExecutionRequest, ExecutionRequestWrapper};

/// Queue facade over the stored per-environment wrappers
#[derive(Debug, Clone)]
pub struct ExecutionQueue {
    storage: WorkflowStorage,
}

impl ExecutionQueue {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self { storage }
    }

    /// Append a request to an environment's queue, creating the wrapper if absent
    pub async fn enqueue(&self, environment: &str, request: ExecutionRequest) -> EngineResult<()> {
        let mut wrapper = self.storage.get_queue(environment).await?;
        wrapper.data.push(request);
        self.storage.set_queue(environment, &wrapper).await?;

        tracing::debug!(
            "📬 Queued execution for environment \"{}\" ({} pending)",
            environment,
            wrapper.data.len()
        );
        Ok(())
    }

    /// Worker poll: the full wrapper, empty when nothing is pending
    pub async fn poll(&self, environment: &str) -> EngineResult<ExecutionRequestWrapper> {
        Ok(self.storage.get_queue(environment).await?)
    }

    /// Worker ack: drop entries matching the confirmed (execution, workflow)
    /// pairs, preserving the order of the rest. The wrapper is written back
    /// only when something was actually removed. Returns the removal count.
    pub async fn confirm(
        &self,
        environment: &str,
        confirmed: &[ExecutionRequest],
    ) -> EngineResult<usize> {
        let wrapper = self.storage.get_queue(environment).await?;
        let before = wrapper.data.len();

        let remaining: Vec<ExecutionRequest> = wrapper
            .data
            .into_iter()
            .filter(|request| {
                !confirmed.iter().any(|done| {
                    done.execution_id == request.execution_id
                        && done.workflow_id == request.workflow_id
                })
            })
            .collect();

        let removed = before - remaining.len();
        if removed > 0 {
            self.storage
                .set_queue(environment, &ExecutionRequestWrapper { data: remaining })
                .await?;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Datastore;

    fn request(execution_id: &str, workflow_id: &str) -> ExecutionRequest {
        ExecutionRequest {
            execution_id: execution_id.to_string(),
            workflow_id: workflow_id.to_string(),
            authorization: "auth".to_string(),
            ..ExecutionRequest::default()
        }
    }

    async fn queue() -> ExecutionQueue {
        ExecutionQueue::new(WorkflowStorage::new(Datastore::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn enqueue_creates_wrapper_and_preserves_order() {
        let queue = queue().await;

        queue.enqueue("onprem", request("e-1", "wf-1")).await.unwrap();
        queue.enqueue("onprem", request("e-2", "wf-1")).await.unwrap();

        let wrapper = queue.poll("onprem").await.unwrap();
        assert_eq!(wrapper.data.len(), 2);
        assert_eq!(wrapper.data[0].execution_id, "e-1");
        assert_eq!(wrapper.data[1].execution_id, "e-2");

        // Other environments stay empty
        assert!(queue.poll("dmz").await.unwrap().data.is_empty());
    }

    #[tokio::test]
    async fn confirm_removes_only_named_pairs() {
        let queue = queue().await;
        queue.enqueue("onprem", request("e-1", "wf-1")).await.unwrap();
        queue.enqueue("onprem", request("e-2", "wf-1")).await.unwrap();
        queue.enqueue("onprem", request("e-3", "wf-2")).await.unwrap();

        // Same execution id under a different workflow id is not confirmed
        let removed = queue
            .confirm("onprem", &[request("e-2", "wf-1"), request("e-3", "wf-1")])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = queue.poll("onprem").await.unwrap().data;
        let ids: Vec<&str> = remaining.iter().map(|r| r.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["e-1", "e-3"]);
    }

    #[tokio::test]
    async fn confirm_unknown_pairs_is_a_noop() {
        let queue = queue().await;
        queue.enqueue("onprem", request("e-1", "wf-1")).await.unwrap();

        let removed = queue.confirm("onprem", &[request("ghost", "wf-1")]).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(queue.poll("onprem").await.unwrap().data.len(), 1);
    }
}
