//! End-to-end engine flow: plan an execution, poll the worker queue, post
//! node results, and observe the final state. Runs the real components over
//! an in-memory store, playing the worker role by hand.

use std::sync::Arc;

use conflux::runtime::{
    ExecutionPlanner, ExecutionQueue, LocalImageBuilder, ResultSink, StartParams, StatisticsSink,
};
use conflux::store::Datastore;
use conflux::workflow::storage::WorkflowStorage;
use conflux::workflow::types::{
    Action, ActionResult, Branch, ExecutionStatus, Workflow, WorkflowConfiguration,
};

struct Engine {
    storage: WorkflowStorage,
    planner: ExecutionPlanner,
    queue: ExecutionQueue,
    sink: ResultSink,
}

async fn engine() -> Engine {
    let storage = WorkflowStorage::new(Datastore::in_memory().await.unwrap());
    let stats = StatisticsSink::new(storage.clone());
    let queue = ExecutionQueue::new(storage.clone());
    let planner = ExecutionPlanner::new(
        storage.clone(),
        queue.clone(),
        Arc::new(LocalImageBuilder),
        stats.clone(),
        "conflux".to_string(),
    );
    let sink = ResultSink::new(storage.clone(), stats);
    Engine {
        storage,
        planner,
        queue,
        sink,
    }
}

fn node(id: &str) -> Action {
    Action {
        id: id.to_string(),
        name: format!("action {}", id),
        app_name: "http".to_string(),
        app_version: "1.0.0".to_string(),
        environment: "onprem".to_string(),
        ..Action::default()
    }
}

fn edge(source: &str, destination: &str) -> Branch {
    Branch {
        source_id: source.to_string(),
        destination_id: destination.to_string(),
        ..Branch::default()
    }
}

fn chain(exit_on_error: bool) -> Workflow {
    Workflow {
        id: "aa000000-0000-0000-0000-00000000aaaa".to_string(),
        name: "triage chain".to_string(),
        is_valid: true,
        start: "a".to_string(),
        actions: vec![node("a"), node("b"), node("c")],
        branches: vec![edge("a", "b"), edge("b", "c")],
        configuration: WorkflowConfiguration {
            exit_on_error,
            start_from_top: false,
        },
        ..Workflow::default()
    }
}

fn worker_result(
    execution_id: &str,
    authorization: &str,
    action: Action,
    status: ExecutionStatus,
    result: &str,
) -> ActionResult {
    ActionResult {
        action,
        execution_id: execution_id.to_string(),
        authorization: authorization.to_string(),
        result: result.to_string(),
        started_at: 1,
        completed_at: 2,
        status,
    }
}

#[tokio::test]
async fn worker_drives_a_chain_to_finished() {
    let engine = engine().await;
    let workflow = chain(false);
    engine.storage.save_workflow(&workflow).await.unwrap();

    // Plan: one queue entry appears for the environment
    let outcome = engine
        .planner
        .plan(&workflow.id, None, StartParams::default())
        .await
        .unwrap();
    let execution_id = outcome.execution().execution_id.clone();
    let authorization = outcome.execution().authorization.clone();

    let pending = engine.queue.poll("onprem").await.unwrap().data;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].execution_id, execution_id);

    // Worker picks the request up and confirms it away
    engine.queue.confirm("onprem", &pending).await.unwrap();
    assert!(engine.queue.poll("onprem").await.unwrap().data.is_empty());

    // Worker walks the chain
    for (id, result) in [("a", "ioc found"), ("b", "enriched"), ("c", "ticket filed")] {
        engine
            .sink
            .handle_result(worker_result(
                &execution_id,
                &authorization,
                node(id),
                ExecutionStatus::Success,
                result,
            ))
            .await
            .unwrap();
    }

    let execution = engine
        .storage
        .get_execution(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Finished);
    assert_eq!(execution.results.len(), 3);
    assert_eq!(execution.result, "ticket filed");
    assert!(execution.completed_at > 0);
}

#[tokio::test]
async fn failure_with_exit_on_error_seals_the_run() {
    let engine = engine().await;
    let workflow = chain(true);
    engine.storage.save_workflow(&workflow).await.unwrap();

    let outcome = engine
        .planner
        .plan(&workflow.id, None, StartParams::default())
        .await
        .unwrap();
    let execution_id = outcome.execution().execution_id.clone();
    let authorization = outcome.execution().authorization.clone();

    engine
        .sink
        .handle_result(worker_result(
            &execution_id,
            &authorization,
            node("a"),
            ExecutionStatus::Success,
            "one",
        ))
        .await
        .unwrap();
    engine
        .sink
        .handle_result(worker_result(
            &execution_id,
            &authorization,
            node("b"),
            ExecutionStatus::Failure,
            "timeout",
        ))
        .await
        .unwrap();

    let execution = engine
        .storage
        .get_execution(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failure);
    assert_eq!(execution.last_node, "b");
    assert_eq!(execution.results.len(), 2);

    // Late result bounces without mutating the record
    let err = engine
        .sink
        .handle_result(worker_result(
            &execution_id,
            &authorization,
            node("c"),
            ExecutionStatus::Success,
            "late",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, conflux::runtime::EngineError::Terminal(_)));
}

#[tokio::test]
async fn partial_rerun_reuses_identity_and_reseeds_skips() {
    let engine = engine().await;
    let workflow = chain(false);
    engine.storage.save_workflow(&workflow).await.unwrap();

    let first = engine
        .planner
        .plan(&workflow.id, None, StartParams::default())
        .await
        .unwrap();
    let execution_id = first.execution().execution_id.clone();
    let authorization = first.execution().authorization.clone();

    // Rerun from c, referencing the first execution
    let rerun = engine
        .planner
        .plan(
            &workflow.id,
            None,
            StartParams {
                reference_execution: Some(execution_id.clone()),
                start: Some("c".to_string()),
                ..StartParams::default()
            },
        )
        .await
        .unwrap();

    let execution = rerun.execution();
    assert_eq!(execution.execution_id, execution_id);
    assert_eq!(execution.authorization, authorization);
    assert_eq!(execution.start, "c");
    assert_eq!(execution.results.get("a").unwrap().status, ExecutionStatus::Skipped);
    assert_eq!(execution.results.get("b").unwrap().status, ExecutionStatus::Skipped);

    // Only c remains to run; its success completes the rerun
    let execution = engine
        .sink
        .handle_result(worker_result(
            &execution_id,
            &authorization,
            node("c"),
            ExecutionStatus::Success,
            "replayed",
        ))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Finished);
    assert_eq!(execution.result, "replayed");
}
