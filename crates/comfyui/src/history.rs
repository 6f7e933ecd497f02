//! Typed view over ComfyUI `/history/{prompt_id}` responses.
//!
//! The response maps the prompt ID to an entry whose `outputs` map node
//! IDs to that node's output object, e.g.
//! `{"9": {"images": [{"filename": "...", "subfolder": "", "type": "output"}]}}`.
//! Map order is preserved, so artifacts come back in response order.

use comfybridge_core::types::NodeId;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One prompt's history record.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Node ID -> node output object.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Execution status recorded alongside the outputs.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// An output artifact that identifies a saved file on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    /// Node that produced the artifact.
    pub node_id: NodeId,
    pub filename: String,
    pub subfolder: String,
    /// Folder classification (`output`, `temp`, `input`).
    pub folder_type: String,
}

/// Pick the entry for `prompt_id` out of a raw history response.
///
/// Returns `Ok(None)` when the prompt is absent (ComfyUI answers `{}`).
pub fn entry_for_prompt(
    body: &Value,
    prompt_id: &str,
) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match body.get(prompt_id) {
        Some(entry) => HistoryEntry::deserialize(entry).map(Some),
        None => Ok(None),
    }
}

impl HistoryEntry {
    /// Every image-like artifact, in the order the response lists them.
    ///
    /// An artifact qualifies when it is an object carrying string
    /// `filename`, `subfolder` and `type` fields; anything else (text
    /// outputs, latent handles, booleans) is skipped.
    pub fn image_artifacts(&self) -> Vec<ImageArtifact> {
        let mut artifacts = Vec::new();

        for (node_id, output) in &self.outputs {
            let Some(output) = output.as_object() else {
                continue;
            };
            for value in output.values() {
                let Some(items) = value.as_array() else {
                    continue;
                };
                artifacts.extend(
                    items
                        .iter()
                        .filter_map(|item| image_artifact(node_id, item)),
                );
            }
        }

        artifacts
    }

    /// `true` when the server recorded the execution as failed.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            == Some("error")
    }

    /// The first recorded `execution_error` message, if any.
    pub fn error_message(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        status.messages.iter().find_map(|message| {
            let pair = message.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            let payload = pair.get(1)?;
            let text = payload.get("exception_message")?.as_str()?;
            match payload.get("node_id").and_then(Value::as_str) {
                Some(node) => Some(format!("node {node}: {text}")),
                None => Some(text.to_string()),
            }
        })
    }
}

fn image_artifact(node_id: &str, item: &Value) -> Option<ImageArtifact> {
    let obj = item.as_object()?;
    Some(ImageArtifact {
        node_id: node_id.to_string(),
        filename: obj.get("filename")?.as_str()?.to_string(),
        subfolder: obj.get("subfolder")?.as_str()?.to_string(),
        folder_type: obj.get("type")?.as_str()?.to_string(),
    })
}
