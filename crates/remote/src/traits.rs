//! The collaborator traits: the contracts every remote backend must fulfil.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::{PushEvent, StoredPrompt, SubmitRequest, SubmitResponse, TaskRequest};
use crate::RemoteError;

/// Executes work the engine does not run in-process.
///
/// Implemented by the HTTP client and by test doubles. Results are opaque
/// JSON; the engine only distinguishes success from failure.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run one task against the given data-store snapshot.
    async fn execute_task(&self, request: TaskRequest) -> Result<Value, RemoteError>;

    /// Submit a whole workflow for asynchronous execution and return its job handle.
    async fn submit_workflow(&self, request: SubmitRequest) -> Result<SubmitResponse, RemoteError>;

    /// Ask the executor to stop a job. Acknowledged later through the push channel.
    async fn stop_workflow(&self, job_id: Uuid) -> Result<(), RemoteError>;
}

/// Live updates for a submitted job.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribe to the events of `job_id`.
    ///
    /// The receiver yields events until the server ends the stream or the
    /// connection drops. Events may still carry other job ids; callers filter.
    async fn subscribe(&self, job_id: Uuid) -> Result<mpsc::Receiver<PushEvent>, RemoteError>;
}

/// Read-only lookup into the prompt library.
#[async_trait]
pub trait PromptLibrary: Send + Sync {
    async fn get_prompt(&self, id: &str) -> Result<Option<StoredPrompt>, RemoteError>;
}
