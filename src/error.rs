//! Error types shared by the chat, search, ingestion and generator modules.

use thiserror::Error;

/// Errors that can occur while serving a chat or generating a project.
#[derive(Error, Debug)]
pub enum WebwiseError {
    /// Missing or invalid settings (API keys, search engine id, paths)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A request was missing something it needs (empty prompt, unknown mode)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transport-level failure talking to a remote service
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A remote service answered with a non-success status
    #[error("{service} API request failed with status {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The uploaded file's extension has no extractor
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The extractor for a known format failed on this input
    #[error("Error processing {kind} file: {message}")]
    Extraction { kind: &'static str, message: String },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),
}

impl WebwiseError {
    pub(crate) fn extraction(kind: &'static str, err: impl std::fmt::Display) -> Self {
        WebwiseError::Extraction {
            kind,
            message: err.to_string(),
        }
    }
}

/// Result type for webwise operations.
pub type Result<T> = std::result::Result<T, WebwiseError>;
