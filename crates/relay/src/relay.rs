//! The invocation pipeline.
//!
//! [`ComfyRelay`] owns the clients for one configured ComfyUI server
//! and runs a workflow end to end: inline input images, submit, wait
//! for the terminal event, collect outputs.

use std::sync::Arc;
use std::time::Duration;

use comfybridge_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use comfybridge_comfyui::client::{new_client_id, ComfyUIClient};
use comfybridge_comfyui::events::ExecutionEvent;
use comfybridge_comfyui::monitor::{wait_for_completion, MonitorError};
use comfybridge_core::config::ComfyUIConfig;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collector::OutputCollector;
use crate::error::RelayError;
use crate::inliner::ImageInliner;
use crate::matcher::ImageUrlMatcher;
use crate::result::ExecutionResult;
use crate::storage::PlatformStorage;
use crate::workflow::parse_workflow_input;

/// Capacity of the observability event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on the queue lookup made when reporting a timeout.
const QUEUE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs workflows on one ComfyUI server on behalf of the host platform.
///
/// Invocations share nothing but the configuration and the HTTP
/// connection pool; each gets its own client ID and event socket, so
/// concurrent invocations never see each other's events.
pub struct ComfyRelay {
    config: ComfyUIConfig,
    api: ComfyUIApi,
    client: ComfyUIClient,
    storage: Arc<dyn PlatformStorage>,
    matcher: Arc<dyn ImageUrlMatcher>,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

impl ComfyRelay {
    pub fn new(
        config: ComfyUIConfig,
        storage: Arc<dyn PlatformStorage>,
        matcher: Arc<dyn ImageUrlMatcher>,
    ) -> Result<Self, RelayError> {
        config.validate()?;

        let api = ComfyUIApi::new(&config)
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {e}")))?;
        let client = ComfyUIClient::new(&config);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            api,
            client,
            storage,
            matcher,
            event_tx,
        })
    }

    /// Build a relay from the credentials in the environment. See
    /// [`ComfyUIConfig::from_env`].
    pub fn from_env(
        storage: Arc<dyn PlatformStorage>,
        matcher: Arc<dyn ImageUrlMatcher>,
    ) -> Result<Self, RelayError> {
        Self::new(ComfyUIConfig::from_env()?, storage, matcher)
    }

    pub fn config(&self) -> &ComfyUIConfig {
        &self.config
    }

    /// Receive [`ExecutionEvent`]s for every invocation on this relay.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_tx.subscribe()
    }

    /// Check the configured credentials against `GET /system_stats`.
    ///
    /// Only an explicit 401 fails. An unreachable server is logged and
    /// accepted, since it may simply be offline right now.
    pub async fn validate_credentials(&self) -> Result<(), RelayError> {
        match self.api.system_stats().await {
            Ok(_) => {
                tracing::info!(server = %self.config.server_url, "ComfyUI credentials accepted");
                Ok(())
            }
            Err(ComfyUIApiError::Unauthorized { body }) => {
                tracing::error!(server = %self.config.server_url, "ComfyUI rejected credentials");
                Err(RelayError::Authentication(body))
            }
            Err(e) => {
                tracing::warn!(
                    server = %self.config.server_url,
                    error = %e,
                    "Could not verify ComfyUI credentials",
                );
                Ok(())
            }
        }
    }

    /// Run one invocation and fold any failure into an error result.
    pub async fn invoke(&self, input: Value, cancel: &CancellationToken) -> ExecutionResult {
        match self.run(input, cancel).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Workflow invocation failed");
                ExecutionResult::failure(&e)
            }
        }
    }

    /// Run one invocation: inline, submit, monitor, collect.
    pub async fn run(
        &self,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, RelayError> {
        let mut graph = parse_workflow_input(input)?;

        let inliner = ImageInliner::new(&self.api, self.storage.as_ref(), self.matcher.as_ref());
        let inlined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            inlined = inliner.inline(&mut graph) => inlined?,
        };
        if !inlined.is_empty() {
            tracing::info!(count = inlined.len(), "Input images inlined");
        }

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let client_id = new_client_id();
        let submitted = self
            .api
            .submit_workflow(&graph, &client_id)
            .await
            .map_err(RelayError::from_submission)?;
        let prompt_id = submitted.prompt_id;

        tracing::info!(
            prompt_id = %prompt_id,
            client_id = %client_id,
            queue_number = ?submitted.number,
            "Workflow submitted to ComfyUI",
        );
        let _ = self.event_tx.send(ExecutionEvent::Submitted {
            prompt_id: prompt_id.clone(),
            client_id: client_id.clone(),
        });

        let deadline = Instant::now() + self.config.execution_timeout;
        self.await_completion(&prompt_id, &client_id, deadline, cancel)
            .await?;

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let images = OutputCollector::new(&self.api, self.storage.as_ref())
            .collect(&prompt_id)
            .await?;

        tracing::info!(prompt_id = %prompt_id, images = images.len(), "Workflow completed");
        Ok(ExecutionResult::success(prompt_id, images))
    }

    /// Subscribe with `client_id` and wait for `prompt_id` to reach its
    /// terminal event before `deadline`.
    async fn await_completion(
        &self,
        prompt_id: &str,
        client_id: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        let mut conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(self.timeout_error(prompt_id).await),
            conn = self.client.connect(client_id) => {
                conn.map_err(RelayError::from_connect)?
            }
        };

        // Events sent before the socket opened are lost; a job that
        // already finished is only visible in history.
        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                conn.close().await;
                return Err(RelayError::Cancelled);
            }
            probe = tokio::time::timeout_at(deadline, self.api.get_history(prompt_id)) => probe,
        };
        match probe {
            Ok(Ok(Some(_))) => {
                tracing::info!(prompt_id, "Job already in history, skipping event wait");
                let _ = self.event_tx.send(ExecutionEvent::Completed {
                    prompt_id: prompt_id.to_string(),
                });
                conn.close().await;
                return Ok(());
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tracing::debug!(prompt_id, error = %e, "Early history probe failed");
            }
            Err(_) => {
                tracing::debug!(prompt_id, "Early history probe hit the deadline");
            }
        }

        let outcome = wait_for_completion(
            &mut conn.ws_stream,
            prompt_id,
            deadline,
            cancel,
            &self.event_tx,
        )
        .await;
        conn.close().await;

        match outcome {
            Ok(()) => Ok(()),
            Err(MonitorError::Timeout) => Err(self.timeout_error(prompt_id).await),
            Err(MonitorError::Cancelled) => Err(RelayError::Cancelled),
            Err(MonitorError::Connection(message)) => Err(RelayError::Connection(message)),
            Err(e @ (MonitorError::Execution { .. } | MonitorError::Interrupted)) => {
                Err(RelayError::Execution(e.to_string()))
            }
        }
    }

    /// Build the timeout error, naming where the job sits in the queue.
    async fn timeout_error(&self, prompt_id: &str) -> RelayError {
        let queue_state = match tokio::time::timeout(QUEUE_PROBE_TIMEOUT, self.api.get_queue()).await
        {
            Ok(Ok(snapshot)) => snapshot.state_of(prompt_id).as_str().to_string(),
            Ok(Err(e)) => {
                tracing::debug!(prompt_id, error = %e, "Queue lookup failed");
                "unknown".to_string()
            }
            Err(_) => "unknown".to_string(),
        };

        tracing::warn!(
            prompt_id,
            queue_state = %queue_state,
            budget_secs = self.config.execution_timeout.as_secs(),
            "Workflow did not finish within the execution timeout",
        );

        RelayError::Timeout {
            budget: self.config.execution_timeout,
            queue_state,
        }
    }
}
