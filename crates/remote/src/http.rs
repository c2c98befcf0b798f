//! HTTP implementation of the collaborator traits.
//!
//! Endpoints (relative to the base URL):
//!   POST /api/tasks/execute: run one task
//!   POST /api/workflows/execute: submit a workflow, returns `{ jobId }`
//!   POST /api/workflows/{job}/stop: request a stop
//!   POST /api/subscriptions: `{ type: "subscribe", jobId }`
//!   GET  /api/workflows/{job}/events: events after a cursor (polled)
//!
//! The push channel is served by polling the events endpoint; a streaming
//! transport can replace it behind the same [`PushChannel`] trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::messages::{ClientMessage, PushEvent, SubmitRequest, SubmitResponse, TaskRequest};
use crate::{PushChannel, RemoteError, RemoteExecutor};

/// Consecutive failed polls after which the event stream is closed.
const MAX_POLL_FAILURES: u32 = 10;

/// Remote executor reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpRemote {
    /// Create a client for `base_url` with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Fatal(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            poll_interval: Duration::from_millis(500),
        })
    }

    /// How often the event endpoint is polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RemoteError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_connect() || err.is_timeout() {
        RemoteError::Retryable(err.to_string())
    } else {
        RemoteError::Fatal(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body: Option<Value> = response.json().await.ok();
        let message = body
            .as_ref()
            .and_then(|b| b.get("error"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("remote executor answered {status}"));
        return Err(if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            RemoteError::Retryable(message)
        } else {
            RemoteError::Fatal(message)
        });
    }
    response
        .json()
        .await
        .map_err(|e| RemoteError::Fatal(format!("invalid response body: {e}")))
}

#[async_trait]
impl RemoteExecutor for HttpRemote {
    async fn execute_task(&self, request: TaskRequest) -> Result<Value, RemoteError> {
        self.post_json("/api/tasks/execute", &request).await
    }

    async fn submit_workflow(&self, request: SubmitRequest) -> Result<SubmitResponse, RemoteError> {
        self.post_json("/api/workflows/execute", &request).await
    }

    async fn stop_workflow(&self, job_id: Uuid) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.url(&format!("/api/workflows/{job_id}/stop")))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(decode::<Value>(response).await.err().unwrap_or_else(|| {
            RemoteError::Fatal("stop request rejected".into())
        }))
    }
}

#[async_trait]
impl PushChannel for HttpRemote {
    async fn subscribe(&self, job_id: Uuid) -> Result<mpsc::Receiver<PushEvent>, RemoteError> {
        let _ack: Value = self
            .post_json("/api/subscriptions", &ClientMessage::Subscribe { job_id })
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let poller = self.clone();
        tokio::spawn(async move { poller.poll_events(job_id, tx).await });
        Ok(rx)
    }
}

impl HttpRemote {
    async fn poll_events(self, job_id: Uuid, tx: mpsc::Sender<PushEvent>) {
        let url = self.url(&format!("/api/workflows/{job_id}/events"));
        let mut cursor = 0usize;
        let mut failures = 0u32;

        loop {
            let batch = match self
                .client
                .get(&url)
                .query(&[("after", cursor)])
                .send()
                .await
            {
                Ok(response) => decode::<Vec<PushEvent>>(response).await,
                Err(e) => Err(transport_error(e)),
            };

            match batch {
                Ok(events) => {
                    failures = 0;
                    cursor += events.len();
                    for event in events {
                        let terminal = event.message.is_terminal();
                        if tx.send(event).await.is_err() {
                            debug!(%job_id, "event receiver dropped, stopping poller");
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(%job_id, attempt = failures, "polling job events failed: {e}");
                    if failures >= MAX_POLL_FAILURES {
                        warn!(%job_id, "giving up on event stream after {failures} failures");
                        return;
                    }
                }
            }

            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
