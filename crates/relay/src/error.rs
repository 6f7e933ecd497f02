//! Invocation-level error taxonomy.
//!
//! Every variant is terminal for the invocation; nothing is retried.

use std::time::Duration;

use comfybridge_comfyui::api::ComfyUIApiError;
use comfybridge_comfyui::client::ComfyUIClientError;
use comfybridge_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The installation configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The invocation input is not a workflow document.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// A platform-hosted input image could not be read.
    #[error("Failed to fetch source image {url}: {reason}")]
    SourceFetch { url: String, reason: String },

    /// ComfyUI did not accept an input image upload.
    #[error("Failed to upload source image {url} to ComfyUI: {reason}")]
    InputUpload { url: String, reason: String },

    /// ComfyUI rejected or failed to accept the job.
    #[error("ComfyUI rejected the workflow ({}): {body}", .status.map_or("no status".to_string(), |s| s.to_string()))]
    Submission { status: Option<u16>, body: String },

    /// ComfyUI refused the configured credentials.
    #[error("ComfyUI authentication failed: {0}")]
    Authentication(String),

    /// The event connection could not be opened or dropped mid-wait.
    #[error("Lost connection to ComfyUI: {0}")]
    Connection(String),

    /// ComfyUI reported a node execution failure.
    #[error("Workflow execution failed: {0}")]
    Execution(String),

    /// The terminal event did not arrive within the budget.
    #[error("Timed out after {}s waiting for the workflow to finish (job is {queue_state})", .budget.as_secs())]
    Timeout { budget: Duration, queue_state: String },

    /// The caller aborted the invocation.
    #[error("Invocation cancelled")]
    Cancelled,

    /// The job was declared complete but history has no entry for it.
    #[error("Job {0} not found in ComfyUI history after completion")]
    HistoryNotFound(String),

    /// An output image failed to download or to re-upload.
    #[error("Failed to relay output {filename} from node {node_id}: {reason}")]
    Relay {
        node_id: String,
        filename: String,
        reason: String,
    },
}

impl From<CoreError> for RelayError {
    fn from(e: CoreError) -> Self {
        Self::Config(e.to_string())
    }
}

impl RelayError {
    /// Map a `/prompt` failure, separating credential rejections.
    pub(crate) fn from_submission(e: ComfyUIApiError) -> Self {
        match e {
            ComfyUIApiError::Unauthorized { body } => Self::Authentication(body),
            ComfyUIApiError::ApiError { status: 403, body } => Self::Authentication(body),
            ComfyUIApiError::ApiError { status, body } => Self::Submission {
                status: Some(status),
                body,
            },
            other => Self::Submission {
                status: other.status(),
                body: other.to_string(),
            },
        }
    }

    /// Map a failed event-socket handshake.
    pub(crate) fn from_connect(e: ComfyUIClientError) -> Self {
        match e {
            ComfyUIClientError::Unauthorized { body } => Self::Authentication(body),
            other => Self::Connection(other.to_string()),
        }
    }
}
