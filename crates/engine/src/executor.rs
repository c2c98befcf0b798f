//! Single-task execution.
//!
//! `TaskExecutor` runs one task against a data-store snapshot:
//! 1. Resolves the task's input keys into named inputs.
//! 2. Dispatches local kinds (`input`, `text_transform`, `chart_extract`,
//!    `simulated_delay`) to in-process handlers.
//! 3. Sends every AI kind to the [`RemoteExecutor`], attaching the stored
//!    prompt when the task references one.
//! 4. Retries `RemoteError::Retryable` (up to `max_retries`) and fails at
//!    once on any other remote error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use remote::{
    InMemoryPromptLibrary, PromptLibrary, RemoteError, RemoteExecutor, StoredPrompt, TaskRequest,
    Unconfigured,
};

use crate::error::TaskError;
use crate::models::{ProviderConfig, Task, TaskKind};
use crate::state::DataStore;
use crate::template::{contains_placeholder, resolve_template};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable remote failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    /// How long `simulated_delay` tasks wait unless they set `delayMs`.
    pub simulated_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            simulated_delay: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Named inputs
// ---------------------------------------------------------------------------

/// Resolve every input key and expose it under its last path segment
/// (`userInput.text` → `text`). Keys that resolve to nothing are omitted.
pub fn named_inputs(task: &Task, data: &DataStore) -> Map<String, Value> {
    let mut inputs = Map::new();
    for key in &task.input_keys {
        let name = key.rsplit('.').next().unwrap_or(key);
        match data.lookup(key) {
            Some(value) => {
                inputs.insert(name.to_owned(), value.clone());
            }
            None => debug!(task_id = %task.id, key, "input key not present in data store"),
        }
    }
    inputs
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

/// Runs one task. Shared by every run of a runner.
pub struct TaskExecutor {
    remote: Arc<dyn RemoteExecutor>,
    prompts: Arc<dyn PromptLibrary>,
    provider: ProviderConfig,
    config: ExecutorConfig,
}

impl TaskExecutor {
    /// Create a new executor.
    pub fn new(
        remote: Arc<dyn RemoteExecutor>,
        prompts: Arc<dyn PromptLibrary>,
        provider: ProviderConfig,
        config: ExecutorConfig,
    ) -> Self {
        Self { remote, prompts, provider, config }
    }

    /// An executor without a remote backend: AI tasks fail, local tasks run.
    pub fn local_only(config: ExecutorConfig) -> Self {
        Self::new(
            Arc::new(Unconfigured),
            Arc::new(InMemoryPromptLibrary::default()),
            ProviderConfig::default(),
            config,
        )
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `task` against `data` and return its result.
    ///
    /// # Errors
    /// Any handler or collaborator failure, as a [`TaskError`]. Never panics
    /// on bad configuration or inputs.
    #[instrument(skip_all, fields(task_id = %task.id, kind = %task.kind))]
    pub async fn execute(&self, task: &Task, data: &DataStore) -> Result<Value, TaskError> {
        match task.kind {
            TaskKind::Input => self.run_input(task, data),
            TaskKind::TextTransform => self.run_transform(task, data),
            TaskKind::ChartExtract => self.run_chart_extract(task, data),
            TaskKind::SimulatedDelay => Ok(self.run_delay(task).await),
            TaskKind::AiGenerate
            | TaskKind::AiSummarize
            | TaskKind::AiClassify
            | TaskKind::AiExtract
            | TaskKind::AiAgent => self.run_remote(task, data).await,
        }
    }

    // -----------------------------------------------------------------------
    // Local handlers
    // -----------------------------------------------------------------------

    fn run_input(&self, task: &Task, data: &DataStore) -> Result<Value, TaskError> {
        let value = task
            .config
            .static_value
            .as_ref()
            .ok_or(TaskError::MissingConfig("staticValue"))?;

        match value {
            Value::String(template) if contains_placeholder(template) => {
                Ok(resolve_template(template, data))
            }
            other => Ok(other.clone()),
        }
    }

    fn run_transform(&self, task: &Task, data: &DataStore) -> Result<Value, TaskError> {
        let op = task
            .config
            .transform
            .as_ref()
            .ok_or(TaskError::MissingConfig("transform"))?;
        op.apply(&named_inputs(task, data))
    }

    fn run_chart_extract(&self, task: &Task, data: &DataStore) -> Result<Value, TaskError> {
        let key = task
            .config
            .data_key
            .as_deref()
            .ok_or(TaskError::MissingConfig("dataKey"))?;

        match data.lookup(key) {
            Some(value) => Ok(value.clone()),
            None => {
                warn!(task_id = %task.id, key, "chart data key not present, returning null");
                Ok(Value::Null)
            }
        }
    }

    async fn run_delay(&self, task: &Task) -> Value {
        let delay = task
            .config
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.simulated_delay);
        tokio::time::sleep(delay).await;

        let delay_ms = delay.as_millis() as u64;
        json!({
            "status": "completed",
            "taskId": task.id,
            "delayMs": delay_ms,
            "message": format!("Simulated delay of {delay_ms} ms finished"),
        })
    }

    // -----------------------------------------------------------------------
    // Remote dispatch
    // -----------------------------------------------------------------------

    async fn run_remote(&self, task: &Task, data: &DataStore) -> Result<Value, TaskError> {
        let prompt = match &task.config.prompt_id {
            Some(id) => Some(self.fetch_prompt(id).await?),
            None => None,
        };

        let request = TaskRequest {
            task: serde_json::to_value(task).map_err(|e| TaskError::Serialization(e.to_string()))?,
            data_store: data.snapshot(),
            provider: self.provider.0.clone(),
            prompt,
        };

        self.execute_with_retry(&task.id, request).await
    }

    async fn fetch_prompt(&self, id: &str) -> Result<StoredPrompt, TaskError> {
        match self.prompts.get_prompt(id).await {
            Ok(Some(prompt)) => Ok(prompt),
            Ok(None) => Err(TaskError::PromptNotFound(id.to_owned())),
            Err(e) => Err(TaskError::Remote(format!("prompt lookup failed: {e}"))),
        }
    }

    async fn execute_with_retry(
        &self,
        task_id: &str,
        request: TaskRequest,
    ) -> Result<Value, TaskError> {
        let mut attempts = 0u32;

        loop {
            match self.remote.execute_task(request.clone()).await {
                Ok(output) => return Ok(output),

                Err(RemoteError::Retryable(msg)) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(TaskError::RetryExhausted { attempts, message: msg });
                    }

                    let delay = self.config.retry_base_delay
                        * 2u32.pow(attempts.saturating_sub(1));

                    warn!(
                        "task '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        task_id, attempts, self.config.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }

                Err(other) => return Err(TaskError::Remote(other.to_string())),
            }
        }
    }
}
