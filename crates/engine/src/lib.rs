//! `engine` crate: workflow models, dependency resolution, templating, and
//! the local and remote execution engines.

pub mod models;
pub mod error;
pub mod state;
pub mod dag;
pub mod template;
pub mod transform;
pub mod executor;
pub mod events;
pub mod bridge;
pub mod runner;

pub use models::{ExecutionStatus, ProviderConfig, Task, TaskConfig, TaskKind, Workflow, WorkflowExecution};
pub use error::{EngineError, TaskError};
pub use state::{DataStore, RunState, RunStatus, TaskState, TaskStatus};
pub use dag::{resolve_order, Feedback, FeedbackLevel, Resolution};
pub use template::resolve_template;
pub use transform::TransformOp;
pub use executor::{ExecutorConfig, TaskExecutor};
pub use events::{ChannelNotifier, ExecutionNotifier, NoopNotifier, RunEvent};
pub use bridge::AsyncExecutionBridge;
pub use runner::{ExecutionMode, RunnerConfig, StopHandle, WorkflowRunner};
