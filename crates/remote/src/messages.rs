//! Wire types exchanged with the remote executor and the push channel.
//!
//! Task and workflow definitions travel as plain JSON so this crate does not
//! depend on the engine's domain types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Ask the remote executor to run a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Serialised task definition.
    pub task: Value,
    /// Snapshot of the run's data store at dispatch time.
    pub data_store: Map<String, Value>,
    /// Provider configuration, passed through untouched.
    #[serde(default)]
    pub provider: Value,
    /// Stored prompt the task references, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<StoredPrompt>,
}

/// Hand a whole workflow to the remote executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub workflow: Value,
    pub input: Value,
    #[serde(default)]
    pub provider: Value,
}

/// Answer to a [`SubmitRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

/// A prompt definition held by the prompt library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPrompt {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

/// Messages the client sends over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe { job_id: Uuid },
}

/// Task status vocabulary used by the remote executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteTaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

/// Messages the server emits for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    WorkflowProgress {
        #[serde(default)]
        completed: Option<usize>,
        #[serde(default)]
        total: Option<usize>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TaskStatus {
        task_id: String,
        status: RemoteTaskStatus,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    WorkflowComplete {
        #[serde(default)]
        data_store: Option<Map<String, Value>>,
    },
    WorkflowFailed { error: String },
    WorkflowStopped {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ChannelMessage {
    /// Whether this message ends the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowComplete { .. } | Self::WorkflowFailed { .. } | Self::WorkflowStopped { .. }
        )
    }
}

/// A server message tagged with the job it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub message: ChannelMessage,
}

impl PushEvent {
    pub fn new(job_id: Uuid, message: ChannelMessage) -> Self {
        Self { job_id, message }
    }
}
