use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shoebox_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Image ID cannot be empty")]
    EmptyImageId,
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Remote storage is not configured. Set R2_ACCOUNT_ID, R2_BUCKET, R2_ACCESS_KEY_ID and R2_SECRET_ACCESS_KEY."
    )]
    RemoteNotConfigured,
    #[error("`{0}` needs the network; drop --offline")]
    OfflineMode(&'static str),
}
