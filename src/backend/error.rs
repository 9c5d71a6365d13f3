//! Collaborator error types

use thiserror::Error;

/// Errors raised by backend collaborators (profile, storage, extraction, export)
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Unsupported file type: {mime_type}")]
    Unsupported { mime_type: String },

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
