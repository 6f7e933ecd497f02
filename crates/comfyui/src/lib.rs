//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, WebSocket connection handling,
//! HTTP API wrappers, history parsing, an execution monitor, and
//! observability event types for relaying jobs to a ComfyUI
//! image-generation server.

pub mod api;
pub mod client;
pub mod events;
pub mod history;
pub mod messages;
pub mod monitor;
