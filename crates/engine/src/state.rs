//! Per-run state: the data store, task lifecycle and run status.
//!
//! A [`RunState`] is created at the start of every run and on every reset,
//! and is owned by exactly one runner.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::template::lookup_path;
use crate::EngineError;

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

/// Key → value results shared by the tasks of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataStore(Map<String, Value>);

impl DataStore {
    /// Key the staged input is seeded under.
    pub const USER_INPUT: &'static str = "userInput";

    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding only the staged input.
    pub fn seeded(input: Value) -> Self {
        let mut store = Self::new();
        store.insert(Self::USER_INPUT, input);
        store
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Resolve a dot-path such as `userInput.text`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.0, path)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Replace the whole content, as a final remote snapshot does.
    pub fn replace(&mut self, snapshot: Map<String, Value>) {
        self.0 = snapshot;
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Owned copy for dispatch to a remote collaborator.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.0.clone()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for DataStore {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// A dependent of a task in this status must be skipped.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending   => write!(f, "PENDING"),
            Self::Running   => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed    => write!(f, "FAILED"),
            Self::Skipped   => write!(f, "SKIPPED"),
        }
    }
}

/// Rejected lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Execution status, timing, result and error of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::pending()
    }
}

impl TaskState {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn require(&self, from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if self.status == from {
            Ok(())
        } else {
            Err(TransitionError { from: self.status, to })
        }
    }

    /// PENDING → RUNNING.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.require(TaskStatus::Pending, TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING → COMPLETED.
    pub fn complete(&mut self, result: Value) -> Result<(), TransitionError> {
        self.require(TaskStatus::Running, TaskStatus::Completed)?;
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING → FAILED.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.require(TaskStatus::Running, TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// PENDING → SKIPPED, never passing through RUNNING.
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.require(TaskStatus::Pending, TaskStatus::Skipped)?;
        self.status = TaskStatus::Skipped;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Status of the runner as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// Only reached in remote mode, when the executor reports `workflow_failed`.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle      => write!(f, "idle"),
            Self::Running   => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed    => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Task states and data store of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    tasks: BTreeMap<String, TaskState>,
    data_store: DataStore,
}

impl RunState {
    /// Every task PENDING, empty data store.
    pub fn new<'a>(task_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            tasks: task_ids
                .into_iter()
                .map(|id| (id.to_owned(), TaskState::pending()))
                .collect(),
            data_store: DataStore::new(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskState> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> &BTreeMap<String, TaskState> {
        &self.tasks
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.get(id).map(|s| s.status)
    }

    pub fn data(&self) -> &DataStore {
        &self.data_store
    }

    pub fn data_mut(&mut self) -> &mut DataStore {
        &mut self.data_store
    }

    /// Apply a lifecycle change to one task.
    pub fn update<F>(&mut self, task_id: &str, change: F) -> Result<&TaskState, EngineError>
    where
        F: FnOnce(&mut TaskState) -> Result<(), TransitionError>,
    {
        let state = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_owned()))?;
        change(state).map_err(|e| EngineError::IllegalTransition {
            task_id: task_id.to_owned(),
            from: e.from,
            to: e.to,
        })?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legal_lifecycle_records_timestamps() {
        let mut state = TaskState::pending();
        state.start().unwrap();
        assert!(state.started_at.is_some());
        state.complete(json!("done")).unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.result, Some(json!("done")));
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut state = TaskState::pending();
        state.skip("upstream failed").unwrap();

        assert_eq!(
            state.start(),
            Err(TransitionError { from: TaskStatus::Skipped, to: TaskStatus::Running })
        );
        assert_eq!(state.status, TaskStatus::Skipped);
    }

    #[test]
    fn skip_requires_pending() {
        let mut state = TaskState::pending();
        state.start().unwrap();
        assert!(state.skip("too late").is_err());
        assert!(state.fail("boom").is_ok());
        assert!(state.complete(json!(1)).is_err());
    }

    #[test]
    fn run_state_reports_unknown_task() {
        let mut run = RunState::new(["a"]);
        assert!(matches!(
            run.update("ghost", TaskState::start),
            Err(EngineError::UnknownTask(id)) if id == "ghost"
        ));
        assert!(run.update("a", TaskState::start).is_ok());
        assert!(matches!(
            run.update("a", TaskState::start),
            Err(EngineError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn seeded_store_exposes_user_input_paths() {
        let store = DataStore::seeded(json!({ "text": "hello" }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup("userInput.text"), Some(&json!("hello")));
        assert_eq!(store.lookup("userInput.missing"), None);
    }
}
