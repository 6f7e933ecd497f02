//! Output collection.
//!
//! Once a job is complete, reads its history entry, downloads every
//! image artifact from ComfyUI and stores it in platform storage. The
//! first artifact that cannot be relayed fails the whole collection.

use comfybridge_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use comfybridge_comfyui::history::ImageArtifact;
use comfybridge_core::media::{guess_mime_type, DEFAULT_MIME};

use crate::error::RelayError;
use crate::result::RelayedImage;
use crate::storage::PlatformStorage;

pub struct OutputCollector<'a> {
    api: &'a ComfyUIApi,
    storage: &'a dyn PlatformStorage,
}

impl<'a> OutputCollector<'a> {
    pub fn new(api: &'a ComfyUIApi, storage: &'a dyn PlatformStorage) -> Self {
        Self { api, storage }
    }

    /// Relay every image artifact of `prompt_id`, in the order the
    /// history response lists them.
    pub async fn collect(&self, prompt_id: &str) -> Result<Vec<RelayedImage>, RelayError> {
        let entry = self
            .api
            .get_history(prompt_id)
            .await
            .map_err(history_error)?
            .ok_or_else(|| RelayError::HistoryNotFound(prompt_id.to_string()))?;

        if entry.is_error() {
            let message = entry
                .error_message()
                .unwrap_or_else(|| "ComfyUI recorded the execution as failed".to_string());
            tracing::error!(prompt_id, error = %message, "History reports execution error");
            return Err(RelayError::Execution(message));
        }

        let artifacts = entry.image_artifacts();
        tracing::info!(prompt_id, count = artifacts.len(), "Collecting output images");

        let mut images = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            images.push(self.relay_artifact(artifact).await?);
        }

        Ok(images)
    }

    async fn relay_artifact(&self, artifact: ImageArtifact) -> Result<RelayedImage, RelayError> {
        let fail = |reason: String| {
            tracing::error!(
                node_id = %artifact.node_id,
                filename = %artifact.filename,
                error = %reason,
                "Failed to relay output image",
            );
            RelayError::Relay {
                node_id: artifact.node_id.clone(),
                filename: artifact.filename.clone(),
                reason,
            }
        };

        let bytes = self
            .api
            .view(&artifact.filename, &artifact.subfolder, &artifact.folder_type)
            .await
            .map_err(|e| fail(format!("download failed: {e}")))?;

        let size_bytes = bytes.len();
        let mime = guess_mime_type(&artifact.filename, DEFAULT_MIME);
        let url = self
            .storage
            .store(bytes, &artifact.filename, mime)
            .await
            .map_err(|e| fail(format!("storage failed: {e}")))?;

        tracing::info!(
            node_id = %artifact.node_id,
            filename = %artifact.filename,
            bytes = size_bytes,
            url = %url,
            "Relayed output image",
        );

        Ok(RelayedImage {
            node_id: artifact.node_id,
            filename: artifact.filename,
            url,
        })
    }
}

/// Map a failed history query. Credential rejections stay distinct.
pub(crate) fn history_error(e: ComfyUIApiError) -> RelayError {
    match e {
        ComfyUIApiError::Unauthorized { body } => RelayError::Authentication(body),
        other => RelayError::Connection(format!("History query failed: {other}")),
    }
}
