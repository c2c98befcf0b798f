//! `MockRemote` and `MockPushChannel`: test doubles for the collaborator traits.
//!
//! Useful in unit and integration tests where a real remote executor is
//! either unavailable or irrelevant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::{PushEvent, SubmitRequest, SubmitResponse, TaskRequest};
use crate::{PushChannel, RemoteError, RemoteExecutor};

/// Behaviour injected into `MockRemote` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `failures` calls, then return the value.
    Flaky { failures: usize, value: Value },
}

/// A mock remote executor that records every request it receives and answers
/// with a programmer-specified result.
pub struct MockRemote {
    default: MockBehaviour,
    per_task: HashMap<String, MockBehaviour>,
    job_id: Uuid,
    submit_error: Option<RemoteError>,
    stop_error: Option<RemoteError>,
    /// All task requests seen (in call order).
    pub calls: Arc<Mutex<Vec<TaskRequest>>>,
    /// All workflow submissions seen.
    pub submissions: Arc<Mutex<Vec<SubmitRequest>>>,
    /// Job ids passed to `stop_workflow`.
    pub stops: Arc<Mutex<Vec<Uuid>>>,
}

impl MockRemote {
    fn with_default(default: MockBehaviour) -> Self {
        Self {
            default,
            per_task: HashMap::new(),
            job_id: Uuid::new_v4(),
            submit_error: None,
            stop_error: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            submissions: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that answers every task with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with_default(MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that rejects every task with a `Fatal` error.
    pub fn failing_fatal(msg: impl Into<String>) -> Self {
        Self::with_default(MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that fails every task with a `Retryable` error.
    pub fn failing_retryable(msg: impl Into<String>) -> Self {
        Self::with_default(MockBehaviour::FailRetryable(msg.into()))
    }

    /// Override the behaviour for one task id.
    pub fn with_task(mut self, task_id: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.per_task.insert(task_id.into(), behaviour);
        self
    }

    /// Job handle returned by `submit_workflow`.
    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = job_id;
        self
    }

    /// Make `submit_workflow` fail with the given error.
    pub fn failing_submission(mut self, error: RemoteError) -> Self {
        self.submit_error = Some(error);
        self
    }

    /// Make `stop_workflow` fail with the given error.
    pub fn failing_stop(mut self, error: RemoteError) -> Self {
        self.stop_error = Some(error);
        self
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Number of task requests received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of task requests received for one task id.
    pub fn calls_for(&self, task_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|req| task_id_of(req) == Some(task_id))
            .count()
    }

    pub fn stop_requests(&self) -> Vec<Uuid> {
        self.stops.lock().unwrap().clone()
    }
}

fn task_id_of(request: &TaskRequest) -> Option<&str> {
    request.task.get("id").and_then(Value::as_str)
}

#[async_trait]
impl RemoteExecutor for MockRemote {
    async fn execute_task(&self, request: TaskRequest) -> Result<Value, RemoteError> {
        let task_id = task_id_of(&request).map(str::to_owned);
        let behaviour = task_id
            .as_deref()
            .and_then(|id| self.per_task.get(id))
            .unwrap_or(&self.default)
            .clone();

        self.calls.lock().unwrap().push(request);

        match behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v),
            MockBehaviour::FailRetryable(msg) => Err(RemoteError::Retryable(msg)),
            MockBehaviour::FailFatal(msg) => Err(RemoteError::Fatal(msg)),
            MockBehaviour::Flaky { failures, value } => {
                let seen = task_id.as_deref().map(|id| self.calls_for(id)).unwrap_or(0);
                if seen <= failures {
                    Err(RemoteError::Retryable(format!("flaky attempt {seen}")))
                } else {
                    Ok(value)
                }
            }
        }
    }

    async fn submit_workflow(&self, request: SubmitRequest) -> Result<SubmitResponse, RemoteError> {
        self.submissions.lock().unwrap().push(request);
        match &self.submit_error {
            Some(err) => Err(err.clone()),
            None => Ok(SubmitResponse { job_id: self.job_id }),
        }
    }

    async fn stop_workflow(&self, job_id: Uuid) -> Result<(), RemoteError> {
        self.stops.lock().unwrap().push(job_id);
        match &self.stop_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// A push channel that replays scripted events and can stay open for events
/// pushed by the test.
pub struct MockPushChannel {
    scripted: Mutex<Vec<PushEvent>>,
    keep_open: bool,
    sender: Mutex<Option<mpsc::Sender<PushEvent>>>,
    subscriptions: Mutex<Vec<Uuid>>,
    fail: Option<RemoteError>,
}

impl MockPushChannel {
    /// Replay `events` on subscribe, then close the stream.
    pub fn scripted(events: Vec<PushEvent>) -> Self {
        Self {
            scripted: Mutex::new(events),
            keep_open: false,
            sender: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            fail: None,
        }
    }

    /// Keep the stream open; push events with [`MockPushChannel::sender`].
    pub fn live() -> Self {
        Self {
            keep_open: true,
            ..Self::scripted(Vec::new())
        }
    }

    /// Refuse every subscription.
    pub fn failing(error: RemoteError) -> Self {
        Self {
            fail: Some(error),
            ..Self::scripted(Vec::new())
        }
    }

    /// Sender of the most recent live subscription.
    pub fn sender(&self) -> Option<mpsc::Sender<PushEvent>> {
        self.sender.lock().unwrap().clone()
    }

    /// Job ids subscribed to, in order.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushChannel for MockPushChannel {
    async fn subscribe(&self, job_id: Uuid) -> Result<mpsc::Receiver<PushEvent>, RemoteError> {
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        self.subscriptions.lock().unwrap().push(job_id);

        let events: Vec<PushEvent> = self.scripted.lock().unwrap().drain(..).collect();
        let (tx, rx) = mpsc::channel(events.len() + 16);
        for event in events {
            // Capacity covers the whole script.
            let _ = tx.try_send(event);
        }

        if self.keep_open {
            *self.sender.lock().unwrap() = Some(tx);
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChannelMessage;
    use serde_json::json;

    fn request(task_id: &str) -> TaskRequest {
        TaskRequest {
            task: json!({ "id": task_id }),
            data_store: Default::default(),
            provider: Value::Null,
            prompt: None,
        }
    }

    #[tokio::test]
    async fn per_task_behaviour_overrides_default() {
        let remote = MockRemote::returning(json!("ok"))
            .with_task("bad", MockBehaviour::FailFatal("rejected".into()));

        assert_eq!(remote.execute_task(request("good")).await, Ok(json!("ok")));
        assert_eq!(
            remote.execute_task(request("bad")).await,
            Err(RemoteError::Fatal("rejected".into()))
        );
        assert_eq!(remote.call_count(), 2);
        assert_eq!(remote.calls_for("bad"), 1);
    }

    #[tokio::test]
    async fn flaky_task_recovers_after_failures() {
        let remote = MockRemote::returning(Value::Null).with_task(
            "flaky",
            MockBehaviour::Flaky { failures: 2, value: json!(42) },
        );

        assert!(remote.execute_task(request("flaky")).await.unwrap_err().is_retryable());
        assert!(remote.execute_task(request("flaky")).await.unwrap_err().is_retryable());
        assert_eq!(remote.execute_task(request("flaky")).await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn scripted_channel_replays_then_closes() {
        let job = Uuid::new_v4();
        let channel = MockPushChannel::scripted(vec![PushEvent::new(
            job,
            ChannelMessage::WorkflowStopped { reason: None },
        )]);

        let mut rx = channel.subscribe(job).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert_eq!(channel.subscriptions(), vec![job]);
    }
}
