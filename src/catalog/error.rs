//! Catalog error types.

use thiserror::Error;

/// Errors from catalog API calls and publishing.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{action}: not found")]
    NotFound { action: String },

    #[error("{action} rejected: {message}")]
    Validation { action: String, message: String },

    #[error("{action} failed with status {status}: {message}")]
    Api {
        action: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {action}: {message}")]
    InvalidResponse { action: String, message: String },

    #[error("State of dataset {id} is unknown: {message}")]
    UnknownState { id: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }
}
