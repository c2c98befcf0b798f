//! Engine-level error types.

use remote::RemoteError;
use thiserror::Error;

use crate::state::TaskStatus;

/// Errors produced by the runner and the async bridge.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `run` was called while a run is active.
    #[error("a run is already in progress")]
    RunInProgress,

    /// Remote mode was selected but no bridge was configured.
    #[error("remote execution mode requires an async execution bridge")]
    BridgeNotConfigured,

    /// Remote mode needs an active job for this operation.
    #[error("no remote job is active")]
    NoActiveJob,

    /// A state change referenced a task that is not part of the run.
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    /// A lifecycle change that the task state machine forbids.
    #[error("task '{task_id}' cannot move from {from} to {to}")]
    IllegalTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The remote executor refused the workflow.
    #[error("workflow submission failed: {0}")]
    Submission(#[source] RemoteError),

    /// Any other collaborator failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a single task failed. The message becomes the task's error text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    /// A field the handler needs is absent from the task configuration.
    #[error("task configuration is missing '{0}'")]
    MissingConfig(&'static str),

    /// A transform operator could not be applied to its inputs.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The referenced stored prompt does not exist.
    #[error("prompt '{0}' not found in the prompt library")]
    PromptNotFound(String),

    /// The remote executor answered with an error.
    #[error("{0}")]
    Remote(String),

    /// A transient remote failure outlived the retry budget.
    #[error("remote execution failed after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },

    #[error("cannot serialise task: {0}")]
    Serialization(String),
}
