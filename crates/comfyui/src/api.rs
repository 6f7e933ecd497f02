//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, file upload and
//! download, history, queue and health checks) using [`reqwest`].
//! Every request carries `Authorization: Bearer <token>` when the
//! configuration holds a token.

use comfybridge_core::config::ComfyUIConfig;
use comfybridge_core::media::{guess_mime_type, MediaKind, DEFAULT_IMAGE_MIME};
use comfybridge_core::types::PromptId;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use url::form_urlencoded;

use crate::history::{entry_for_prompt, HistoryEntry};

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    auth_token: Option<String>,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: PromptId,
    /// Position in the execution queue, when reported.
    pub number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawSubmitResponse {
    prompt_id: Option<String>,
    number: Option<i64>,
}

/// Response from `/upload/image` and `/upload/video`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    /// Filename the server stored the upload under (may be renamed).
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_upload_type")]
    pub folder_type: String,
}

fn default_upload_type() -> String {
    "input".to_string()
}

impl UploadResponse {
    /// Value a loader node expects in its filename input: the name,
    /// prefixed by the subfolder when there is one.
    pub fn remote_path(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// Raw `/queue` snapshot. Each entry is a list whose second element
/// is the prompt ID.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

/// Where a prompt sits in the server queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Running,
    Pending,
    NotQueued,
}

impl QueueState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Pending => "pending",
            Self::NotQueued => "not queued",
        }
    }
}

impl QueueSnapshot {
    /// Locate `prompt_id` in the running or pending lists.
    pub fn state_of(&self, prompt_id: &str) -> QueueState {
        let contains = |items: &[serde_json::Value]| {
            items.iter().any(|item| {
                item.get(1).and_then(serde_json::Value::as_str) == Some(prompt_id)
            })
        };

        if contains(&self.queue_running) {
            QueueState::Running
        } else if contains(&self.queue_pending) {
            QueueState::Pending
        } else {
            QueueState::NotQueued
        }
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI rejected the credentials (HTTP 401).
    #[error("ComfyUI authentication failed: {body}")]
    Unauthorized { body: String },

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A success response lacked a required field.
    #[error("ComfyUI response is missing '{0}'")]
    MissingField(&'static str),

    /// A success response body was not in the expected shape.
    #[error("Failed to decode ComfyUI response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ComfyUIApiError {
    /// HTTP status carried by the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::ApiError { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            Self::MissingField(_) | Self::Decode(_) => None,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for the configured ComfyUI instance.
    ///
    /// The underlying client applies `config.request_timeout` to every
    /// request.
    pub fn new(config: &ComfyUIConfig) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across multiple instances).
    pub fn with_client(client: reqwest::Client, config: &ComfyUIConfig) -> Self {
        Self {
            client,
            api_url: config.server_url.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// Base HTTP URL this client talks to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.  Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .request(reqwest::Method::POST, "/prompt")
            .json(&body)
            .send()
            .await?;

        let raw: RawSubmitResponse = Self::parse_response(response).await?;
        let prompt_id = raw
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or(ComfyUIApiError::MissingField("prompt_id"))?;

        Ok(SubmitResponse {
            prompt_id,
            number: raw.number,
        })
    }

    /// Upload file bytes into the server's input folder.
    ///
    /// Images go to `POST /upload/image`. Videos go to
    /// `POST /upload/video`, falling back to the image endpoint when the
    /// server has no video endpoint (HTTP 404).
    pub async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        kind: MediaKind,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let mime = guess_mime_type(filename, DEFAULT_IMAGE_MIME);

        if kind == MediaKind::Video {
            let form = upload_form(bytes.clone(), filename, "video", mime)?;
            match self.post_upload("/upload/video", form).await {
                Err(ComfyUIApiError::ApiError { status: 404, .. }) => {
                    tracing::debug!(filename, "Video upload endpoint not found, using image endpoint");
                }
                other => return other,
            }
        }

        let form = upload_form(bytes, filename, "image", mime)?;
        self.post_upload("/upload/image", form).await
    }

    /// Retrieve the history entry for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request.  ComfyUI answers
    /// `{}` for prompts it does not know, which maps to `Ok(None)`.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/history/{prompt_id}"))
            .send()
            .await?;

        let body: serde_json::Value = Self::parse_response(response).await?;
        Ok(entry_for_prompt(&body, prompt_id)?)
    }

    /// Download a file via `GET /view`.
    pub async fn view(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::GET, "/view")
            .query(&view_params(filename, subfolder, folder_type))
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Build the `/view` URL for a file, omitting empty parameters.
    pub fn view_url(&self, filename: &str, subfolder: &str, folder_type: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(view_params(filename, subfolder, folder_type))
            .finish();
        format!("{}/view?{query}", self.api_url)
    }

    /// Fetch the current execution queue via `GET /queue`.
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self.request(reqwest::Method::GET, "/queue").send().await?;
        Self::parse_response(response).await
    }

    /// Probe `GET /system_stats` to check reachability and credentials.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::GET, "/system_stats")
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Start a request against `path`, attaching the bearer token.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.api_url));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn post_upload(
        &self,
        path: &str,
        form: Form,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .multipart(form)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an error containing the status
    /// and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ComfyUIApiError::Unauthorized { body });
            }
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn upload_form(
    bytes: Vec<u8>,
    filename: &str,
    field: &'static str,
    mime: &str,
) -> Result<Form, ComfyUIApiError> {
    let part = Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str(mime)?;
    Ok(Form::new().part(field, part).text("type", "input"))
}

fn view_params<'a>(
    filename: &'a str,
    subfolder: &'a str,
    folder_type: &'a str,
) -> Vec<(&'static str, &'a str)> {
    [
        ("filename", filename),
        ("subfolder", subfolder),
        ("type", folder_type),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .collect()
}
