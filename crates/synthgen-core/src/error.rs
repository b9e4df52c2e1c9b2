use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating an incoming generation request
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown output format: {0}")]
    UnknownFormat(String),
}

impl RequestError {
    /// Create a new InvalidRequest error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

/// Errors raised while persisting the generator properties file
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("Failed to write generator configuration to {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the output catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Output directory does not exist")]
    DirectoryMissing,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("No files to download")]
    NothingToArchive,

    /// Carries only the requested relative path, never the resolved absolute one.
    #[error("Path rejected: {0}")]
    PathTraversalRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl CatalogError {
    /// Check if this error is a client error (4xx category)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::DirectoryMissing
                | Self::NotFound(_)
                | Self::NothingToArchive
                | Self::PathTraversalRejected(_)
        )
    }
}
