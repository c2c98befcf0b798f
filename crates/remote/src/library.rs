//! In-memory prompt library and the "no remote configured" placeholder.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::{PushEvent, StoredPrompt, SubmitRequest, SubmitResponse, TaskRequest};
use crate::{PromptLibrary, PushChannel, RemoteError, RemoteExecutor};

/// Prompt library backed by a map. Loaded once, never written by the engine.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPromptLibrary {
    prompts: HashMap<String, StoredPrompt>,
}

impl InMemoryPromptLibrary {
    pub fn new(prompts: impl IntoIterator<Item = StoredPrompt>) -> Self {
        Self {
            prompts: prompts.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[async_trait]
impl PromptLibrary for InMemoryPromptLibrary {
    async fn get_prompt(&self, id: &str) -> Result<Option<StoredPrompt>, RemoteError> {
        Ok(self.prompts.get(id).cloned())
    }
}

/// Stand-in used when no remote executor was configured.
///
/// Every call fails with a `Fatal` error, so AI tasks fail cleanly while
/// local tasks keep working.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

const NOT_CONFIGURED: &str = "no remote executor configured";

#[async_trait]
impl RemoteExecutor for Unconfigured {
    async fn execute_task(&self, _request: TaskRequest) -> Result<Value, RemoteError> {
        Err(RemoteError::Fatal(NOT_CONFIGURED.into()))
    }

    async fn submit_workflow(&self, _request: SubmitRequest) -> Result<SubmitResponse, RemoteError> {
        Err(RemoteError::Fatal(NOT_CONFIGURED.into()))
    }

    async fn stop_workflow(&self, _job_id: Uuid) -> Result<(), RemoteError> {
        Err(RemoteError::Fatal(NOT_CONFIGURED.into()))
    }
}

#[async_trait]
impl PushChannel for Unconfigured {
    async fn subscribe(&self, _job_id: Uuid) -> Result<mpsc::Receiver<PushEvent>, RemoteError> {
        Err(RemoteError::Channel(NOT_CONFIGURED.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_by_id() {
        let library = InMemoryPromptLibrary::new([StoredPrompt {
            id: "p1".into(),
            title: "Summary".into(),
            content: "Summarise {{article}}".into(),
            system_prompt: None,
        }]);

        assert_eq!(library.len(), 1);
        let found = library.get_prompt("p1").await.unwrap();
        assert_eq!(found.map(|p| p.title), Some("Summary".to_string()));
        assert!(library.get_prompt("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unconfigured_rejects_everything() {
        let err = Unconfigured
            .execute_task(TaskRequest {
                task: Value::Null,
                data_store: Default::default(),
                provider: Value::Null,
                prompt: None,
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(Unconfigured.subscribe(Uuid::nil()).await.is_err());
    }
}
