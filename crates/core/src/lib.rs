//! Shared building blocks for the ComfyUI bridge.
//!
//! Holds the installation-wide configuration value, the core error
//! type, identifier aliases, and filename-based media type guessing.

pub mod config;
pub mod error;
pub mod media;
pub mod types;
