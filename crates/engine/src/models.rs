//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They serialise to the camelCase JSON the studio stores and sends
//! to the remote executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::transform::TransformOp;

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// What a task does. Local kinds run in-process; every AI kind is sent to
/// the remote executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Produces a static value or a resolved template.
    Input,
    /// Applies a named transform operator to its inputs.
    TextTransform,
    /// Reads a value out of the data store for a chart to render.
    ChartExtract,
    /// Waits, then returns a canned status payload.
    SimulatedDelay,
    AiGenerate,
    AiSummarize,
    AiClassify,
    AiExtract,
    AiAgent,
}

impl TaskKind {
    /// Whether the task runs in-process.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            Self::Input | Self::TextTransform | Self::ChartExtract | Self::SimulatedDelay
        )
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Input          => "input",
            Self::TextTransform  => "text_transform",
            Self::ChartExtract   => "chart_extract",
            Self::SimulatedDelay => "simulated_delay",
            Self::AiGenerate     => "ai_generate",
            Self::AiSummarize    => "ai_summarize",
            Self::AiClassify     => "ai_classify",
            Self::AiExtract      => "ai_extract",
            Self::AiAgent        => "ai_agent",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TaskConfig
// ---------------------------------------------------------------------------

/// Kind-specific configuration. Every field is optional; a handler that
/// needs a missing field fails the task when it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Prompt or text template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Operator applied by `text_transform` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformOp>,
    /// Value returned by `input` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_value: Option<Value>,
    /// Data-store path read by `chart_extract` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_key: Option<String>,
    /// Override for the `simulated_delay` duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// AI agent configuration, opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Value>,
    /// Stored prompt to attach to remote requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier within this workflow (referenced by dependencies).
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: TaskKind,
    /// Ids of the tasks that must finish first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Dot-paths into the data store, exposed to the handler by last segment.
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Data-store key written when the task completes.
    pub output_key: String,
    #[serde(default)]
    pub config: TaskConfig,
}

impl Task {
    /// Convenience constructor for testing.
    pub fn new(id: impl Into<String>, kind: TaskKind, output_key: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            kind,
            dependencies: Vec::new(),
            input_keys: Vec::new(),
            output_key: output_key.into(),
            config: TaskConfig::default(),
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tasks: Vec<Task>,
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(id: impl Into<String>, name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tasks,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Active model-provider settings, passed through untouched to remote execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderConfig(pub Value);

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// Coarse status of a server-side execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending   => write!(f, "pending"),
            Self::Running   => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed    => write!(f, "failed"),
            Self::Stopped   => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "stopped"   => Ok(Self::Stopped),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Handle to a workflow running on the remote executor. Not executable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub job_id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(job_id: Uuid, workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
