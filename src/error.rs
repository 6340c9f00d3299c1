//! Error types for the extension host.

use thiserror::Error;

use crate::permissions::PermissionError;

/// Errors that can occur while hosting extensions.
///
/// Every variant is a per-request or per-extension failure; none of them
/// should ever take the host down. Manifest and activation failures are
/// terminal for the extension until it is reloaded; everything else is
/// isolated to the request (or stream, or background task) that caused it.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Invalid manifest: {}", .0.join("; "))]
    ManifestInvalid(Vec<String>),

    #[error(transparent)]
    PermissionDenied(#[from] PermissionError),

    #[error("{0}")]
    PayloadInvalid(String),

    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    #[error("Extension '{0}' not found")]
    ExtensionNotFound(String),

    #[error("Extension '{id}' is {status}, not active")]
    ExtensionNotActive { id: String, status: &'static str },

    #[error("Extension '{id}' failed to activate: {message}")]
    ActivationFailed { id: String, message: String },

    #[error("Stream failed: {0}")]
    Stream(String),

    #[error("No streaming request with id '{0}'")]
    StreamNotFound(String),

    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    RequestTimeout { method: String, timeout_ms: u64 },

    #[error("Extension channel closed")]
    ChannelClosed,

    #[error("Extension returned error: {0}")]
    ExtensionError(String),

    #[error("Platform callback failed: {0}")]
    Callback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// Wrap an injected-callback failure, preserving its message.
    pub fn callback(err: anyhow::Error) -> Self {
        HostError::Callback(format!("{err:#}"))
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
