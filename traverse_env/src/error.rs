//! Error types for the Traverse environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The asset collaborator rejected the request (I/O failure, HTTP error, etc.)
    #[error("Fetch of {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    /// The requested asset does not exist
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The scene refused an operation or could not be constructed
    #[error("Scene error: {0}")]
    SceneError(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a fetch error.
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::FetchFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a scene error.
    pub fn scene(msg: impl Into<String>) -> Self {
        Self::SceneError(msg.into())
    }
}
