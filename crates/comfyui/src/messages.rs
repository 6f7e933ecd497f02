//! Typed event frames from the ComfyUI `/ws` feed.
//!
//! Text frames look like `{"type": "<kind>", "data": {...}}`. Kinds the
//! monitor acts on decode into [`ComfyUIMessage`]; any other kind (custom
//! nodes add their own) surfaces as [`Frame::Unknown`] rather than an
//! error. Binary frames carry preview images and are not parsed here.

use serde::Deserialize;

/// Event kinds relevant to following one prompt's execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Queue depth broadcast; the first one also carries the session ID.
    Status(StatusData),

    ExecutionStart(ExecutionStartData),

    /// Nodes whose outputs were reused from the server cache.
    ExecutionCached(ExecutionCachedData),

    /// Node now running. `node: null` marks the end of the prompt.
    Executing(ExecutingData),

    /// Sampler step counter.
    Progress(ProgressData),

    /// A node produced UI output.
    Executed(ExecutedData),

    ExecutionSuccess(ExecutionSuccessData),

    ExecutionInterrupted(InterruptedData),

    /// A node raised; the prompt is abandoned.
    ExecutionError(ErrorData),
}

/// Wire names of every [`ComfyUIMessage`] variant.
const KNOWN_KINDS: &[&str] = &[
    "status",
    "execution_start",
    "execution_cached",
    "executing",
    "progress",
    "executed",
    "execution_success",
    "execution_interrupted",
    "execution_error",
];

/// A decoded text frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Message(ComfyUIMessage),
    /// A well-formed frame whose `type` is not modelled here.
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
    /// Session ID the server assigned to this socket.
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    /// Prompts queued or running, including this one.
    pub queue_remaining: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// `node == None` is the terminal frame for `prompt_id`. Older servers
/// omit `prompt_id`; such frames cannot be attributed and are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Step `value` of `max` within the running node.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100); `0` when `max` is not positive.
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0).clamp(0.0, 100.0) as i16
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    /// UI output of the node; the same descriptors later appear in history.
    pub output: serde_json::Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSuccessData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

/// Decode a text frame whose kind is expected to be known.
///
/// Unknown kinds are an error here; use [`parse_frame`] to tell them
/// apart from malformed input.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Parse a text frame, separating unknown kinds from malformed input.
///
/// Returns `Ok(Frame::Unknown)` for a valid envelope whose `type` is not
/// modelled, and `Err` for invalid JSON or a known kind with a payload
/// that does not match its schema.
pub fn parse_frame(text: &str) -> Result<Frame, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if !KNOWN_KINDS.contains(&envelope.kind.as_str()) {
        return Ok(Frame::Unknown(envelope.kind));
    }
    parse_message(text).map(Frame::Message)
}
