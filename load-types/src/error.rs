//! Error types for chatload payloads.

use thiserror::Error;

/// Errors raised while building or decoding chat payloads.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Agent key was not valid base64 or was empty
    #[error("invalid agent key: {0}")]
    InvalidKey(String),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown RPC operation name
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}
