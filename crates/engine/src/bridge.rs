//! Remote asynchronous execution.
//!
//! `AsyncExecutionBridge` hands a whole workflow to the remote executor,
//! follows the job over the push channel, and translates every inbound
//! message into the same [`RunState`] shape local execution produces.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use remote::{ChannelMessage, PushChannel, PushEvent, RemoteExecutor, RemoteTaskStatus, SubmitRequest};

use crate::events::{ExecutionNotifier, RunEvent};
use crate::models::{ExecutionStatus, ProviderConfig, Workflow, WorkflowExecution};
use crate::state::{RunState, TaskState, TaskStatus};
use crate::EngineError;

/// How a job ended, as reported by the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    Failed(String),
    Stopped(String),
}

/// Submits workflows to the remote executor and interprets its push events.
#[derive(Clone)]
pub struct AsyncExecutionBridge {
    remote: Arc<dyn RemoteExecutor>,
    channel: Arc<dyn PushChannel>,
}

impl AsyncExecutionBridge {
    pub fn new(remote: Arc<dyn RemoteExecutor>, channel: Arc<dyn PushChannel>) -> Self {
        Self { remote, channel }
    }

    /// Submit `workflow` with the staged input and return the execution handle.
    ///
    /// # Errors
    /// [`EngineError::Submission`] when the executor refuses the job.
    #[instrument(skip_all, fields(workflow_id = %workflow.id))]
    pub async fn submit(
        &self,
        workflow: &Workflow,
        input: &Value,
        provider: &ProviderConfig,
    ) -> Result<WorkflowExecution, EngineError> {
        let request = SubmitRequest {
            workflow: serde_json::to_value(workflow)?,
            input: input.clone(),
            provider: provider.0.clone(),
        };
        let response = self
            .remote
            .submit_workflow(request)
            .await
            .map_err(EngineError::Submission)?;

        info!(job_id = %response.job_id, "workflow submitted for remote execution");
        Ok(WorkflowExecution::new(response.job_id, &workflow.id))
    }

    /// Open the push channel for `job_id`.
    pub async fn subscribe(&self, job_id: Uuid) -> Result<mpsc::Receiver<PushEvent>, EngineError> {
        Ok(self.channel.subscribe(job_id).await?)
    }

    /// Ask the executor to stop `job_id`. Confirmation arrives as `workflow_stopped`.
    pub async fn stop(&self, job_id: Uuid) -> Result<(), EngineError> {
        info!(%job_id, "requesting remote stop");
        Ok(self.remote.stop_workflow(job_id).await?)
    }

    /// Keep `event` only if it belongs to the active job.
    pub fn accept(active: Uuid, event: PushEvent) -> Option<ChannelMessage> {
        if event.job_id == active {
            Some(event.message)
        } else {
            warn!(event_job = %event.job_id, active_job = %active, "discarding event for stale job");
            None
        }
    }

    /// Apply one message to the run state. Returns how the job ended, if it did.
    pub fn apply<N: ExecutionNotifier>(
        &self,
        message: ChannelMessage,
        workflow: &Workflow,
        state: &mut RunState,
        execution: &mut WorkflowExecution,
        notifier: &N,
    ) -> Option<Terminal> {
        match message {
            ChannelMessage::WorkflowProgress { completed, total, message } => {
                info!(?completed, ?total, "remote progress: {}", message.as_deref().unwrap_or(""));
                notifier.notify(RunEvent::Progress { completed, total, message });
                None
            }

            ChannelMessage::TaskStatus { task_id, status, result, error } => {
                if execution.status == ExecutionStatus::Pending {
                    execution.set_status(ExecutionStatus::Running);
                }
                let Some(task) = workflow.task(&task_id) else {
                    warn!(%task_id, "status update for unknown task ignored");
                    return None;
                };

                match apply_task_status(state, &task_id, status, result.clone(), error) {
                    Ok(true) => {
                        if let (RemoteTaskStatus::Completed, Some(value)) = (status, result) {
                            state.data_mut().insert(task.output_key.clone(), value);
                        }
                        if let Some(task_state) = state.task(&task_id) {
                            notifier.notify(RunEvent::TaskStateChanged {
                                task_id: task_id.clone(),
                                state: task_state.clone(),
                            });
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("ignoring remote task update: {e}"),
                }
                None
            }

            ChannelMessage::WorkflowComplete { data_store } => {
                if let Some(snapshot) = data_store {
                    state.data_mut().replace(snapshot);
                }
                execution.set_status(ExecutionStatus::Completed);
                info!(job_id = %execution.job_id, "remote workflow completed");
                Some(Terminal::Completed)
            }

            ChannelMessage::WorkflowFailed { error } => {
                settle_unfinished(state, &error, notifier);
                execution.set_status(ExecutionStatus::Failed);
                warn!(job_id = %execution.job_id, "remote workflow failed: {error}");
                Some(Terminal::Failed(error))
            }

            ChannelMessage::WorkflowStopped { reason } => {
                let reason = reason.unwrap_or_else(|| "Workflow stopped".to_owned());
                settle_unfinished(state, &reason, notifier);
                execution.set_status(ExecutionStatus::Stopped);
                info!(job_id = %execution.job_id, "remote workflow stopped: {reason}");
                Some(Terminal::Stopped(reason))
            }
        }
    }
}

/// Translate a remote task status. `Ok(false)` means nothing changed.
fn apply_task_status(
    state: &mut RunState,
    task_id: &str,
    status: RemoteTaskStatus,
    result: Option<Value>,
    error: Option<String>,
) -> Result<bool, EngineError> {
    let current = state
        .status_of(task_id)
        .ok_or_else(|| EngineError::UnknownTask(task_id.to_owned()))?;

    let finishing = matches!(status, RemoteTaskStatus::Completed | RemoteTaskStatus::Failed);
    if finishing && current == TaskStatus::Pending {
        // The executor may report completion without a prior `active`.
        state.update(task_id, TaskState::start)?;
    }

    match status {
        RemoteTaskStatus::Pending => return Ok(false),
        RemoteTaskStatus::Active => {
            state.update(task_id, TaskState::start)?;
        }
        RemoteTaskStatus::Completed => {
            state.update(task_id, |s| s.complete(result.unwrap_or(Value::Null)))?;
        }
        RemoteTaskStatus::Failed => {
            let message = error.unwrap_or_else(|| "Task failed on the remote executor".to_owned());
            state.update(task_id, |s| s.fail(message))?;
        }
        RemoteTaskStatus::Skipped => {
            let reason = error.unwrap_or_else(|| "Skipped by the remote executor".to_owned());
            state.update(task_id, |s| s.skip(reason))?;
        }
    }
    Ok(true)
}

/// PENDING tasks become SKIPPED and RUNNING tasks FAILED with `reason`.
fn settle_unfinished<N: ExecutionNotifier>(state: &mut RunState, reason: &str, notifier: &N) {
    let unfinished: Vec<(String, TaskStatus)> = state
        .tasks()
        .iter()
        .filter(|(_, s)| !s.status.is_terminal())
        .map(|(id, s)| (id.clone(), s.status))
        .collect();

    for (task_id, status) in unfinished {
        let updated = match status {
            TaskStatus::Pending => state.update(&task_id, |s| s.skip(reason)),
            _ => state.update(&task_id, |s| s.fail(reason)),
        };
        if let Ok(task_state) = updated {
            notifier.notify(RunEvent::TaskStateChanged {
                task_id: task_id.clone(),
                state: task_state.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopNotifier;
    use crate::models::{Task, TaskKind};
    use remote::mock::{MockPushChannel, MockRemote};
    use remote::RemoteError;
    use serde_json::json;

    fn workflow() -> Workflow {
        Workflow::new(
            "wf",
            "Remote",
            vec![
                Task::new("draft", TaskKind::AiGenerate, "draft"),
                Task::new("review", TaskKind::AiClassify, "review").depends_on(["draft"]),
            ],
        )
    }

    fn bridge(remote: MockRemote) -> AsyncExecutionBridge {
        AsyncExecutionBridge::new(Arc::new(remote), Arc::new(MockPushChannel::live()))
    }

    fn task_status(task_id: &str, status: RemoteTaskStatus, result: Option<Value>) -> ChannelMessage {
        ChannelMessage::TaskStatus { task_id: task_id.into(), status, result, error: None }
    }

    #[tokio::test]
    async fn submit_returns_pending_execution() {
        let job = Uuid::new_v4();
        let remote = Arc::new(MockRemote::returning(Value::Null).with_job_id(job));
        let bridge = AsyncExecutionBridge::new(remote.clone(), Arc::new(MockPushChannel::live()));

        let execution = bridge
            .submit(&workflow(), &json!({ "text": "hi" }), &ProviderConfig(json!({ "model": "m" })))
            .await
            .unwrap();

        assert_eq!(execution.job_id, job);
        assert_eq!(execution.workflow_id, "wf");
        assert_eq!(execution.status, ExecutionStatus::Pending);

        let submissions = remote.submissions.lock().unwrap();
        assert_eq!(submissions[0].input, json!({ "text": "hi" }));
        assert_eq!(submissions[0].workflow["tasks"][1]["dependencies"], json!(["draft"]));
        assert_eq!(submissions[0].provider["model"], "m");
    }

    #[tokio::test]
    async fn submit_failure_is_reported() {
        let bridge = bridge(
            MockRemote::returning(Value::Null)
                .failing_submission(RemoteError::Fatal("quota exceeded".into())),
        );
        let err = bridge
            .submit(&workflow(), &Value::Null, &ProviderConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Submission(RemoteError::Fatal(m)) if m == "quota exceeded"));
    }

    #[test]
    fn events_for_other_jobs_are_discarded() {
        let active = Uuid::new_v4();
        let stale = PushEvent::new(Uuid::new_v4(), ChannelMessage::WorkflowFailed { error: "old".into() });
        let current = PushEvent::new(active, ChannelMessage::WorkflowStopped { reason: None });

        assert!(AsyncExecutionBridge::accept(active, stale).is_none());
        assert!(AsyncExecutionBridge::accept(active, current).is_some());
    }

    #[test]
    fn task_status_translates_into_local_vocabulary() {
        let bridge = bridge(MockRemote::returning(Value::Null));
        let wf = workflow();
        let mut state = RunState::new(["draft", "review"]);
        let mut execution = WorkflowExecution::new(Uuid::new_v4(), "wf");

        let steps = [
            task_status("draft", RemoteTaskStatus::Active, None),
            task_status("draft", RemoteTaskStatus::Completed, Some(json!("text"))),
            ChannelMessage::TaskStatus {
                task_id: "review".into(),
                status: RemoteTaskStatus::Failed,
                result: None,
                error: Some("rate limited".into()),
            },
        ];
        for message in steps {
            assert_eq!(bridge.apply(message, &wf, &mut state, &mut execution, &NoopNotifier), None);
        }

        let draft = state.task("draft").unwrap();
        assert_eq!(draft.status, TaskStatus::Completed);
        assert_eq!(draft.result, Some(json!("text")));
        assert_eq!(state.data().get("draft"), Some(&json!("text")));

        // Failure reported without a prior `active` still passes through RUNNING.
        let review = state.task("review").unwrap();
        assert_eq!(review.status, TaskStatus::Failed);
        assert_eq!(review.error.as_deref(), Some("rate limited"));
        assert!(review.started_at.is_some());
        assert!(!state.data().contains_key("review"));
        assert_eq!(execution.status, ExecutionStatus::Running);
    }

    #[test]
    fn illegal_or_unknown_updates_are_ignored() {
        let bridge = bridge(MockRemote::returning(Value::Null));
        let wf = workflow();
        let mut state = RunState::new(["draft", "review"]);
        let mut execution = WorkflowExecution::new(Uuid::new_v4(), "wf");

        bridge.apply(task_status("draft", RemoteTaskStatus::Completed, Some(json!(1))), &wf, &mut state, &mut execution, &NoopNotifier);
        bridge.apply(task_status("draft", RemoteTaskStatus::Active, None), &wf, &mut state, &mut execution, &NoopNotifier);
        bridge.apply(task_status("ghost", RemoteTaskStatus::Active, None), &wf, &mut state, &mut execution, &NoopNotifier);

        assert_eq!(state.status_of("draft"), Some(TaskStatus::Completed));
        assert!(state.task("ghost").is_none());
    }

    #[test]
    fn completion_applies_snapshot_wholesale() {
        let bridge = bridge(MockRemote::returning(Value::Null));
        let wf = workflow();
        let mut state = RunState::new(["draft", "review"]);
        state.data_mut().insert("stale", json!(true));
        let mut execution = WorkflowExecution::new(Uuid::new_v4(), "wf");

        let snapshot = json!({ "userInput": {}, "draft": "d", "review": "ok" });
        let terminal = bridge.apply(
            ChannelMessage::WorkflowComplete { data_store: snapshot.as_object().cloned() },
            &wf,
            &mut state,
            &mut execution,
            &NoopNotifier,
        );

        assert_eq!(terminal, Some(Terminal::Completed));
        assert_eq!(state.data().as_map(), snapshot.as_object().unwrap());
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[test]
    fn failure_settles_unfinished_tasks() {
        let bridge = bridge(MockRemote::returning(Value::Null));
        let wf = workflow();
        let mut state = RunState::new(["draft", "review"]);
        let mut execution = WorkflowExecution::new(Uuid::new_v4(), "wf");
        bridge.apply(task_status("draft", RemoteTaskStatus::Active, None), &wf, &mut state, &mut execution, &NoopNotifier);

        let terminal = bridge.apply(
            ChannelMessage::WorkflowFailed { error: "provider unavailable".into() },
            &wf,
            &mut state,
            &mut execution,
            &NoopNotifier,
        );

        assert_eq!(terminal, Some(Terminal::Failed("provider unavailable".into())));
        let draft = state.task("draft").unwrap();
        assert_eq!(draft.status, TaskStatus::Failed);
        assert_eq!(draft.error.as_deref(), Some("provider unavailable"));
        assert_eq!(state.status_of("review"), Some(TaskStatus::Skipped));
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    #[test]
    fn stop_settles_unfinished_tasks() {
        let bridge = bridge(MockRemote::returning(Value::Null));
        let wf = workflow();
        let mut state = RunState::new(["draft", "review"]);
        let mut execution = WorkflowExecution::new(Uuid::new_v4(), "wf");
        bridge.apply(task_status("draft", RemoteTaskStatus::Active, None), &wf, &mut state, &mut execution, &NoopNotifier);

        let terminal = bridge.apply(
            ChannelMessage::WorkflowStopped { reason: Some("Stopped by user".into()) },
            &wf,
            &mut state,
            &mut execution,
            &NoopNotifier,
        );

        assert_eq!(terminal, Some(Terminal::Stopped("Stopped by user".into())));
        assert_eq!(state.status_of("draft"), Some(TaskStatus::Failed));
        assert_eq!(state.status_of("review"), Some(TaskStatus::Skipped));
        assert_eq!(state.task("review").unwrap().error.as_deref(), Some("Stopped by user"));
        assert_eq!(execution.status, ExecutionStatus::Stopped);
    }
}
