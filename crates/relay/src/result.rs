//! Outcome of one relay invocation, as handed back to the host.

use serde::Serialize;

use crate::error::RelayError;

/// One generated image, now stored on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayedImage {
    /// Workflow node that produced the image.
    pub node_id: String,
    /// Filename ComfyUI gave the image.
    pub filename: String,
    /// Platform URL the bytes were stored under.
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Structured result: `status` plus either the relayed images or a
/// human-readable failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub images: Vec<RelayedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

impl ExecutionResult {
    pub fn success(prompt_id: impl Into<String>, images: Vec<RelayedImage>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            images,
            message: None,
            prompt_id: Some(prompt_id.into()),
        }
    }

    pub fn failure(error: &RelayError) -> Self {
        Self {
            status: ExecutionStatus::Error,
            images: Vec::new(),
            message: Some(error.to_string()),
            prompt_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
