//! Error types shared across the viewer core
//!
//! Lower layers return these as values. Only the session turns them into
//! user-visible notices.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure producing a page surface
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("page {0} is out of range")]
    PageOutOfRange(usize),

    #[error("render backend failed: {0}")]
    Backend(String),
}

/// Failure opening a document
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("unable to open {}: {reason}", path.display())]
    Backend { path: PathBuf, reason: String },

    #[error(transparent)]
    Cache(#[from] pdf_viewer_cache::ConfigError),
}

/// Failure in a persistent or embedded annotation store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("annotation {0} not found")]
    NotFound(String),

    #[error("annotation {0} is not a note")]
    NotANote(String),

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("{0}")]
    Backend(String),
}

/// Failure of a content search run
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("search timed out after {0:?}")]
    Timeout(Duration),

    #[error("search cancelled")]
    Cancelled,

    #[error("search exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("I/O error while reading search output: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a highlight export that did not succeed
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0} not set")]
    NoToken(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("export service rejected the token")]
    Auth,

    #[error("export service returned status {0}")]
    Server(u16),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExportError {
    /// Short message for the status line
    pub fn user_message(&self) -> String {
        match self {
            ExportError::NoToken(var) => {
                format!("{var} not set. Get token from readwise.io/access_token")
            }
            ExportError::Network(_) => "Network error".to_string(),
            ExportError::Auth => "Invalid token".to_string(),
            ExportError::Server(_) => "Server error".to_string(),
            ExportError::Json(_) => "JSON encoding error".to_string(),
        }
    }
}
