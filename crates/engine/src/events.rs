//! Run events and notifiers.
//!
//! The runner emits an event for every run-status and task-state change so
//! consumers (a UI, a log sink, a test) can follow progress without polling.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::dag::Feedback;
use crate::state::{RunStatus, TaskState};

/// Events emitted while a workflow runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { workflow_id: String, task_count: usize },
    TaskStateChanged { task_id: String, state: TaskState },
    Feedback { feedback: Feedback },
    /// Remote progress report, passed through.
    Progress { completed: Option<usize>, total: Option<usize>, message: Option<String> },
    RunFinished { status: RunStatus, data_store: Value },
}

/// Receives run events.
///
/// Called synchronously from the run loop; implementations must not block.
pub trait ExecutionNotifier: Send + Sync {
    fn notify(&self, event: RunEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
    fn notify(&self, _event: RunEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    // Unbounded: one event per transition, and the run loop must never wait on a slow consumer.
    sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self { sender }
    }

    /// A notifier together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ExecutionNotifier for ChannelNotifier {
    fn notify(&self, event: RunEvent) {
        // The receiver may have been dropped.
        let _ = self.sender.send(event);
    }
}
