//! Execution events surfaced for observability.
//!
//! Produced by the monitor (and the relay pipeline) while a job runs,
//! and broadcast over a [`tokio::sync::broadcast`] channel. Nothing in
//! the execution path depends on anyone listening.

use serde::Serialize;

/// A high-level state change of one submitted job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The workflow was accepted into the server queue.
    Submitted { prompt_id: String, client_id: String },

    /// The server started executing the prompt.
    Started { prompt_id: String },

    /// Some nodes were served from the server-side cache.
    Cached { prompt_id: String, nodes: Vec<String> },

    /// A specific node began executing.
    NodeExecuting { prompt_id: String, node: String },

    /// A long-running node made progress (step `value` of `max`).
    Progress {
        prompt_id: String,
        node: Option<String>,
        value: i32,
        max: i32,
        /// Completion percentage (0-100).
        percent: i16,
    },

    /// The terminal event was observed.
    Completed { prompt_id: String },

    /// The server reported a failure for this prompt.
    Failed { prompt_id: String, error: String },
}
