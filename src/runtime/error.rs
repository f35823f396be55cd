/// Engine error taxonomy
///
/// Classifies every failure the runtime core can surface so the HTTP layer
/// maps them to stable status codes. Store errors stay opaque; callers retry
/// at their discretion.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed uuid, missing required field, unsupported frequency
    #[error("{0}")]
    InputInvalid(String),

    /// Worker authorization does not match the execution secret
    #[error("Bad authorization key")]
    AuthMismatch,

    /// Unknown execution, workflow, schedule, or auth id
    #[error("{0}")]
    NotFound(String),

    /// Write attempted against an already-terminal execution
    #[error("{0}")]
    Terminal(String),

    /// Planning failed; the execution was not created and nothing was queued
    #[error("{0}")]
    PlanFailure(String),

    /// Propagated storage failure
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
