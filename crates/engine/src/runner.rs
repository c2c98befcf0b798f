//! Workflow orchestration.
//!
//! `WorkflowRunner` drives one workflow through its dependency order, either
//! in-process (one task at a time through the [`TaskExecutor`]) or by handing
//! the whole workflow to the remote executor through the
//! [`AsyncExecutionBridge`]. Both modes produce the same [`RunState`].

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use remote::PushEvent;

use crate::bridge::{AsyncExecutionBridge, Terminal};
use crate::dag::{resolve_order, Feedback};
use crate::events::{ExecutionNotifier, NoopNotifier, RunEvent};
use crate::executor::TaskExecutor;
use crate::models::{Workflow, WorkflowExecution};
use crate::state::{DataStore, RunState, RunStatus, TaskState, TaskStatus, TransitionError};
use crate::EngineError;

const CANCELLED_REASON: &str = "Workflow cancelled before this task started";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where tasks execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Sequentially, in this process.
    #[default]
    Local,
    /// On the remote executor, followed over the push channel.
    Remote,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: ExecutionMode,
    /// How long a remote stop waits for `workflow_stopped` before giving up.
    pub stop_confirm_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Local,
            stop_confirm_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// StopHandle
// ---------------------------------------------------------------------------

/// Requests cooperative cancellation of a runner's current run from another task.
///
/// Always addresses the run in progress, even across `reset`.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: watch::Receiver<CancellationToken>,
    status: watch::Receiver<RunStatus>,
}

impl StopHandle {
    /// Ask the current run to stop. The task in flight finishes; nothing after it starts.
    pub fn stop(&self) {
        self.token.borrow().cancel();
    }

    /// False as soon as a stop has been requested.
    pub fn is_running(&self) -> bool {
        *self.status.borrow() == RunStatus::Running && !self.token.borrow().is_cancelled()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Runs one workflow. At most one run is active at a time.
pub struct WorkflowRunner<N: ExecutionNotifier = NoopNotifier> {
    workflow: Workflow,
    executor: TaskExecutor,
    bridge: Option<AsyncExecutionBridge>,
    notifier: N,
    config: RunnerConfig,
    state: RunState,
    feedback: Vec<Feedback>,
    execution: Option<WorkflowExecution>,
    token: watch::Sender<CancellationToken>,
    status: watch::Sender<RunStatus>,
}

impl WorkflowRunner<NoopNotifier> {
    pub fn new(workflow: Workflow, executor: TaskExecutor) -> Self {
        let (token, _) = watch::channel(CancellationToken::new());
        let (status, _) = watch::channel(RunStatus::Idle);
        let state = RunState::new(workflow.tasks.iter().map(|t| t.id.as_str()));
        Self {
            workflow,
            executor,
            bridge: None,
            notifier: NoopNotifier,
            config: RunnerConfig::default(),
            state,
            feedback: Vec::new(),
            execution: None,
            token,
            status,
        }
    }
}

impl<N: ExecutionNotifier> WorkflowRunner<N> {
    /// Replace the notifier that receives [`RunEvent`]s.
    pub fn with_notifier<M: ExecutionNotifier>(self, notifier: M) -> WorkflowRunner<M> {
        WorkflowRunner {
            workflow: self.workflow,
            executor: self.executor,
            bridge: self.bridge,
            notifier,
            config: self.config,
            state: self.state,
            feedback: self.feedback,
            execution: self.execution,
            token: self.token,
            status: self.status,
        }
    }

    pub fn with_bridge(mut self, bridge: AsyncExecutionBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.config.mode = mode;
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn task_state(&self, task_id: &str) -> Option<&TaskState> {
        self.state.task(task_id)
    }

    pub fn data_store(&self) -> &DataStore {
        self.state.data()
    }

    /// Diagnostics from the last resolution and run.
    pub fn feedback(&self) -> &[Feedback] {
        &self.feedback
    }

    /// Handle of the remote job, when one is active.
    pub fn execution(&self) -> Option<&WorkflowExecution> {
        self.execution.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.token.subscribe(),
            status: self.status.subscribe(),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Run the workflow with `input` staged under `userInput`.
    ///
    /// Returns the final run status. Validation errors leave the runner Idle
    /// and are reported through [`feedback`](Self::feedback).
    ///
    /// # Errors
    /// [`EngineError::RunInProgress`] if a run is active, and
    /// [`EngineError::BridgeNotConfigured`] in remote mode without a bridge.
    #[instrument(skip_all, fields(workflow_id = %self.workflow.id))]
    pub async fn run(&mut self, input: Value) -> Result<RunStatus, EngineError> {
        if self.status() == RunStatus::Running {
            return Err(EngineError::RunInProgress);
        }
        let bridge = match self.config.mode {
            ExecutionMode::Local => None,
            ExecutionMode::Remote => Some(self.bridge.clone().ok_or(EngineError::BridgeNotConfigured)?),
        };

        self.feedback.clear();
        self.execution = None;
        let resolution = resolve_order(&self.workflow.tasks);
        for feedback in resolution.feedback.iter().cloned() {
            self.publish(feedback);
        }
        self.state = RunState::new(self.workflow.tasks.iter().map(|t| t.id.as_str()));
        if resolution.is_fatal() {
            warn!("workflow is invalid, not running");
            self.status.send_replace(RunStatus::Idle);
            return Ok(RunStatus::Idle);
        }

        self.state.data_mut().insert(DataStore::USER_INPUT, input.clone());
        if self.token.borrow().is_cancelled() {
            self.token.send_replace(CancellationToken::new());
        }
        if resolution.order.is_empty() {
            return Ok(self.finish(RunStatus::Completed));
        }

        self.status.send_replace(RunStatus::Running);
        info!(mode = ?self.config.mode, tasks = resolution.order.len(), "workflow run started");
        self.notifier.notify(RunEvent::RunStarted {
            workflow_id: self.workflow.id.clone(),
            task_count: resolution.order.len(),
        });

        let status = match bridge {
            None => self.run_local(&resolution.order).await,
            Some(bridge) => self.run_remote(&bridge, input).await,
        };
        Ok(status)
    }

    /// Back to a clean Idle state. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.token.send_replace(CancellationToken::new());
        self.state = RunState::new(self.workflow.tasks.iter().map(|t| t.id.as_str()));
        self.feedback.clear();
        self.execution = None;
        self.status.send_replace(RunStatus::Idle);
        debug!(workflow_id = %self.workflow.id, "runner reset");
    }

    /// Stop a remote job that is no longer being followed.
    ///
    /// A run in progress is stopped through its [`StopHandle`] instead.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        self.token.borrow().cancel();
        if self.status() != RunStatus::Running {
            return Ok(());
        }
        if let (Some(bridge), Some(execution)) = (&self.bridge, &self.execution) {
            bridge.stop(execution.job_id).await?;
        }
        self.settle_pending();
        self.finish(RunStatus::Cancelled);
        Ok(())
    }

    /// Resubscribe to the active remote job after the push channel dropped.
    pub async fn reattach(&mut self) -> Result<RunStatus, EngineError> {
        let bridge = self.bridge.clone().ok_or(EngineError::BridgeNotConfigured)?;
        let job_id = self
            .execution
            .as_ref()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.job_id)
            .filter(|_| self.status() == RunStatus::Running)
            .ok_or(EngineError::NoActiveJob)?;

        info!(%job_id, "reattaching to remote job");
        Ok(self.follow(&bridge, job_id).await)
    }

    // -----------------------------------------------------------------------
    // Local execution
    // -----------------------------------------------------------------------

    async fn run_local(&mut self, order: &[String]) -> RunStatus {
        let token = self.token.borrow().clone();

        for (position, task_id) in order.iter().enumerate() {
            if token.is_cancelled() {
                self.skip_cancelled(&order[position..]);
                return self.finish(RunStatus::Cancelled);
            }
            let Some(task) = self.workflow.task(task_id).cloned() else {
                continue;
            };

            let blocker = task
                .dependencies
                .iter()
                .find(|dep| self.state.status_of(dep).is_some_and(TaskStatus::blocks_dependents))
                .cloned();
            if let Some(blocker) = blocker {
                info!(task_id = %task.id, %blocker, "skipping task, dependency did not complete");
                let reason = format!("Skipped due to dependency failure: {blocker}");
                self.transition(&task.id, |s| s.skip(reason));
                continue;
            }

            self.transition(&task.id, TaskState::start);
            match self.executor.execute(&task, self.state.data()).await {
                Ok(value) => {
                    self.state.data_mut().insert(task.output_key.clone(), value.clone());
                    self.transition(&task.id, |s| s.complete(value));
                }
                Err(e) => {
                    error!(task_id = %task.id, "task failed: {e}");
                    self.transition(&task.id, |s| s.fail(e.to_string()));
                }
            }

            if token.is_cancelled() {
                self.skip_cancelled(&order[position + 1..]);
                return self.finish(RunStatus::Cancelled);
            }
        }

        self.finish(RunStatus::Completed)
    }

    fn skip_cancelled(&mut self, task_ids: &[String]) {
        for task_id in task_ids {
            if self.state.status_of(task_id) == Some(TaskStatus::Pending) {
                self.transition(task_id, |s| s.skip(CANCELLED_REASON));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Remote execution
    // -----------------------------------------------------------------------

    async fn run_remote(&mut self, bridge: &AsyncExecutionBridge, input: Value) -> RunStatus {
        let submitted = bridge
            .submit(&self.workflow, &input, self.executor.provider())
            .await;
        let execution = match submitted {
            Ok(execution) => execution,
            Err(e) => {
                error!("remote submission failed: {e}");
                self.publish(Feedback::error(e.to_string()));
                self.status.send_replace(RunStatus::Idle);
                return RunStatus::Idle;
            }
        };

        let job_id = execution.job_id;
        self.execution = Some(execution);
        self.follow(bridge, job_id).await
    }

    /// Consume push events for `job_id` until a terminal message, a stop, or channel closure.
    async fn follow(&mut self, bridge: &AsyncExecutionBridge, job_id: Uuid) -> RunStatus {
        let mut events = match bridge.subscribe(job_id).await {
            Ok(events) => events,
            Err(e) => {
                error!(%job_id, "push channel subscription failed: {e}");
                self.publish(Feedback::warning(format!(
                    "Could not follow remote job {job_id}: {e}"
                )));
                return RunStatus::Running;
            }
        };
        let token = self.token.borrow().clone();

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = token.cancelled() => return self.stop_remote(bridge, job_id, events).await,
            };
            let Some(event) = event else {
                warn!(%job_id, "push channel closed before the job finished");
                self.publish(Feedback::warning(
                    "Lost connection to the remote executor before the workflow finished",
                ));
                return RunStatus::Running;
            };
            if let Some(terminal) = self.handle_event(bridge, job_id, event) {
                return self.finish_remote(terminal);
            }
        }
    }

    /// Send the stop request, then wait a bounded time for the confirmation.
    async fn stop_remote(
        &mut self,
        bridge: &AsyncExecutionBridge,
        job_id: Uuid,
        mut events: mpsc::Receiver<PushEvent>,
    ) -> RunStatus {
        if let Err(e) = bridge.stop(job_id).await {
            self.publish(Feedback::warning(format!("Stop request failed: {e}")));
        }
        self.status.send_replace(RunStatus::Cancelled);

        let deadline = tokio::time::sleep(self.config.stop_confirm_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(%job_id, "no stop confirmation from the remote executor");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Some(terminal) = self.handle_event(bridge, job_id, event) {
                        return self.finish_remote(terminal);
                    }
                }
            }
        }

        self.settle_pending();
        self.finish(RunStatus::Cancelled)
    }

    fn handle_event(
        &mut self,
        bridge: &AsyncExecutionBridge,
        job_id: Uuid,
        event: PushEvent,
    ) -> Option<Terminal> {
        let message = AsyncExecutionBridge::accept(job_id, event)?;
        let execution = self.execution.as_mut()?;
        bridge.apply(message, &self.workflow, &mut self.state, execution, &self.notifier)
    }

    fn finish_remote(&mut self, terminal: Terminal) -> RunStatus {
        match terminal {
            Terminal::Completed => self.finish(RunStatus::Completed),
            Terminal::Failed(message) => {
                self.publish(Feedback::error(message));
                self.finish(RunStatus::Failed)
            }
            Terminal::Stopped(_) => self.finish(RunStatus::Cancelled),
        }
    }

    /// Skip every task that never started, when no confirmation settles them.
    fn settle_pending(&mut self) {
        let pending: Vec<String> = self
            .state
            .tasks()
            .iter()
            .filter(|(_, s)| s.status == TaskStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        self.skip_cancelled(&pending);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn transition<F>(&mut self, task_id: &str, change: F)
    where
        F: FnOnce(&mut TaskState) -> Result<(), TransitionError>,
    {
        match self.state.update(task_id, change) {
            Ok(state) => {
                debug!(task_id, status = %state.status, "task state changed");
                self.notifier.notify(RunEvent::TaskStateChanged {
                    task_id: task_id.to_owned(),
                    state: state.clone(),
                });
            }
            Err(e) => error!("{e}"),
        }
    }

    fn publish(&mut self, feedback: Feedback) {
        if feedback.is_error() {
            error!("{}", feedback.message);
        } else {
            warn!("{}", feedback.message);
        }
        self.notifier.notify(RunEvent::Feedback { feedback: feedback.clone() });
        self.feedback.push(feedback);
    }

    fn finish(&mut self, status: RunStatus) -> RunStatus {
        self.status.send_replace(status);
        info!(workflow_id = %self.workflow.id, %status, "workflow run finished");
        self.notifier.notify(RunEvent::RunFinished {
            status,
            data_store: Value::Object(self.state.data().snapshot()),
        });
        status
    }
}
