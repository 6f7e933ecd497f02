//! Host storage seam.
//!
//! The host platform owns file storage; the relay only needs to read
//! the bytes behind a platform file URL and to store bytes under a new
//! URL.

use async_trait::async_trait;

/// Errors reported by a [`PlatformStorage`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The referenced file does not exist or is not accessible.
    #[error("File not found: {0}")]
    NotFound(String),

    /// The storage backend could not be reached or refused the request.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// File storage capability provided by the host platform.
#[async_trait]
pub trait PlatformStorage: Send + Sync {
    /// Fetch the bytes of a platform-hosted file.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;

    /// Store `bytes` and return a URL the host can hand to its users.
    async fn store(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<String, StorageError>;
}
