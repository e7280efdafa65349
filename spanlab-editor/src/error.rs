//! Error types for spanlab-editor
//!
//! Defines editor-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for the editor crate
#[derive(Error, Debug)]
pub enum Error {
    /// Errors bubbling up from the shared crate (config, JSON, I/O)
    #[error(transparent)]
    Common(#[from] spanlab_common::Error),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level HTTP failure (connect, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Entity (annotation, prediction, history item, region) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current state (e.g. editing a prediction)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid caller input
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience Result type using the editor Error
pub type Result<T> = std::result::Result<T, Error>;
