//! Relay between a host platform's file storage and a ComfyUI server.
//!
//! One invocation runs three steps strictly in order:
//!
//! 1. [`inliner`] uploads every platform-hosted image the workflow
//!    references into ComfyUI and rewrites those inputs to the
//!    server-local filename.
//! 2. [`relay`] submits the workflow and monitors the event feed until
//!    the job's terminal event, a server-reported failure, the
//!    configured deadline, or caller cancellation.
//! 3. [`collector`] reads the job's history and copies every output
//!    image back into platform storage.
//!
//! The host supplies storage through [`storage::PlatformStorage`] and
//! decides which strings are platform file URLs through
//! [`matcher::ImageUrlMatcher`].

pub mod collector;
pub mod error;
pub mod inliner;
pub mod matcher;
pub mod relay;
pub mod result;
pub mod storage;
pub mod workflow;

pub use error::RelayError;
pub use relay::ComfyRelay;
pub use result::{ExecutionResult, ExecutionStatus, RelayedImage};
