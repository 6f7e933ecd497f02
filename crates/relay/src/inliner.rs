//! Copies platform-hosted input images into ComfyUI.
//!
//! For each workflow input whose value is a platform file URL, the
//! bytes are fetched from host storage, uploaded to ComfyUI's input
//! folder, and the input is rewritten to the server-local filename.
//! References are processed one at a time in document order.

use comfybridge_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use comfybridge_core::media::MediaKind;
use serde_json::Value;

use crate::error::RelayError;
use crate::matcher::ImageUrlMatcher;
use crate::storage::PlatformStorage;
use crate::workflow::{find_image_fields, set_input};

/// One input rewritten by [`ImageInliner::inline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedImage {
    pub node_id: String,
    pub input: String,
    pub source_url: String,
    /// Value now stored in the input (`name` or `subfolder/name`).
    pub remote_name: String,
    /// Number of bytes uploaded.
    pub size_bytes: usize,
}

pub struct ImageInliner<'a> {
    api: &'a ComfyUIApi,
    storage: &'a dyn PlatformStorage,
    matcher: &'a dyn ImageUrlMatcher,
}

impl<'a> ImageInliner<'a> {
    pub fn new(
        api: &'a ComfyUIApi,
        storage: &'a dyn PlatformStorage,
        matcher: &'a dyn ImageUrlMatcher,
    ) -> Self {
        Self {
            api,
            storage,
            matcher,
        }
    }

    /// Upload every referenced platform image and rewrite `graph` in
    /// place. A graph without references is left untouched.
    ///
    /// Stops at the first failure; inputs rewritten before it stay
    /// rewritten, but the invocation is aborted anyway.
    pub async fn inline(&self, graph: &mut Value) -> Result<Vec<InlinedImage>, RelayError> {
        let fields = find_image_fields(graph, self.matcher);
        if fields.is_empty() {
            tracing::debug!("No platform image references in workflow");
            return Ok(Vec::new());
        }

        tracing::info!(count = fields.len(), "Inlining platform images into ComfyUI");

        let mut inlined = Vec::with_capacity(fields.len());
        for field in fields {
            let bytes = self.storage.fetch(&field.url).await.map_err(|e| {
                tracing::error!(url = %field.url, error = %e, "Failed to fetch source image");
                RelayError::SourceFetch {
                    url: field.url.clone(),
                    reason: e.to_string(),
                }
            })?;

            let size_bytes = bytes.len();
            let filename = upload_filename(&field.url, &field.node_id);
            let kind = MediaKind::from_filename(&filename);

            let uploaded = self
                .api
                .upload_file(bytes, &filename, kind)
                .await
                .map_err(|e| match e {
                    ComfyUIApiError::Unauthorized { body } => RelayError::Authentication(body),
                    other => RelayError::InputUpload {
                        url: field.url.clone(),
                        reason: other.to_string(),
                    },
                })?;

            let remote_name = uploaded.remote_path();
            set_input(
                graph,
                &field.node_id,
                &field.input,
                Value::String(remote_name.clone()),
            );

            tracing::info!(
                node_id = %field.node_id,
                input = %field.input,
                filename = %remote_name,
                bytes = size_bytes,
                "Uploaded input image to ComfyUI",
            );

            inlined.push(InlinedImage {
                node_id: field.node_id,
                input: field.input,
                source_url: field.url,
                remote_name,
                size_bytes,
            });
        }

        Ok(inlined)
    }
}

/// Filename to offer ComfyUI for an upload: the URL's last path
/// segment when it has an extension, else `input_<node>.png`. The
/// server renames on collision.
fn upload_filename(url: &str, node_id: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or_default();

    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => last.to_string(),
        _ => format!("input_{node_id}.png"),
    }
}
