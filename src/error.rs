use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RegistrarError {
    #[error("invalid dataset identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid data map: {0}")]
    InvalidDataMap(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    #[diagnostic(help("the search index may be down; retry later or raise catalog.retries"))]
    CatalogUnavailable(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("No object was found in the index for {0}.")]
    NotFound(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl RegistrarError {
    /// Transport and server-side faults that a caller may choose to retry.
    pub fn is_catalog_unavailable(&self) -> bool {
        match self {
            RegistrarError::CatalogUnavailable(_) => true,
            RegistrarError::CatalogStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}
