//! Error types for artifact writing

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting an artifact
#[derive(Error, Debug)]
pub enum StorageError {
    /// The parent directory could not be created
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory that was being created
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The artifact could not be written
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Destination of the artifact
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The payload could not be serialized
    #[error("Failed to serialize artifact for {path}: {source}")]
    Serialize {
        /// Destination of the artifact
        path: PathBuf,
        /// Serialization error
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Path the failed operation was about
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::CreateDir { path, .. }
            | Self::Write { path, .. }
            | Self::Serialize { path, .. } => path,
        }
    }
}

/// Result type for artifact writing
pub type Result<T> = std::result::Result<T, StorageError>;
