//! Error types for shoebox-core

use thiserror::Error;

/// Result type alias using shoebox-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shoebox-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image record not found
    #[error("Image not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The record store has no room left for a snapshot
    #[error("Storage full: {0}")]
    StorageFull(String),

    /// A picked image could not be copied into app storage
    #[error("Local persist failed: {0}")]
    LocalPersist(String),
}

impl Error {
    /// Whether this error means the disk holding the record store is full.
    pub fn is_storage_full(&self) -> bool {
        match self {
            Self::StorageFull(_) => true,
            Self::LibSql(_) | Self::Database(_) | Self::Io(_) => {
                is_disk_full_message(&self.to_string())
            }
            _ => false,
        }
    }
}

pub(crate) fn is_disk_full_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database or disk is full") || message.contains("no space left on device")
}
