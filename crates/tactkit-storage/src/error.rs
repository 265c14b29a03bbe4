//! Error types for the storage container

use std::path::PathBuf;
use thiserror::Error;

use tactkit_formats::blte::BlteError;
use tactkit_formats::index::IndexError;

/// Storage container errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage root does not exist
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// BLTE decode or encode failure
    #[error("BLTE error: {0}")]
    Blte(#[from] BlteError),

    /// Index file failure
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network failure on every configured host
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid argument to a container operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON configuration could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// True for errors that must abort a batch operation
    ///
    /// Malformed data and unsupported variants are fatal. Missing files,
    /// transport failures and similar per-item conditions are not.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Blte(e) => e.is_format_error() || e.is_unsupported(),
            Self::Index(e) => e.is_format_error() || matches!(e, IndexError::Unsupported(_)),
            Self::DirectoryNotFound(_) | Self::Cancelled | Self::Config(_) | Self::Json(_) => true,
            Self::Io(_) | Self::Transport(_) | Self::InvalidArgument(_) => false,
        }
    }

    /// True when the error means the requested item does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::Index(IndexError::Io(e)) | Self::Blte(BlteError::Io(e)) => {
                e.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
