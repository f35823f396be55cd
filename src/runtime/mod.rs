/// Runtime Execution Engine
///
/// This module implements the execution core:
/// - Planning requests into committed executions plus queued worker work
/// - Accepting worker results and advancing the per-run state machine
/// - Per-environment queues with at-least-once delivery
/// - Interval schedules that re-fire the planner
/// - Best-effort statistics counters

// Error taxonomy shared by the runtime core
pub mod error;

// Execution planner: request -> committed execution + queue entries
pub mod planner;

// Per-environment worker queue
pub mod queue;

// Result sink: worker postings and the execution state machine
pub mod sink;

// Interval schedule service
pub mod scheduler;

// Fire-and-forget statistics counters
pub mod stats;

// Re-export main types
pub use error::{EngineError, EngineResult};
pub use planner::{ExecutionPlanner, ImageBuilder, LocalImageBuilder, PlanOutcome, StartParams};
pub use queue::ExecutionQueue;
pub use scheduler::ScheduleService;
pub use sink::ResultSink;
pub use stats::StatisticsSink;
