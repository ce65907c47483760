//! Error types for sync operations

use anchora_remote::ApiError;
use anchora_vault::VaultError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote API error: {0}")]
    Api(#[from] ApiError),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("anchor not found in vault: {0}")]
    AnchorNotFound(String),

    #[error("sync already in progress")]
    AlreadySyncing,
}

impl SyncError {
    /// Session-fatal errors abort the whole run and surface a re-auth need;
    /// everything else is contained at item or batch level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Api(ApiError::Unauthorized(_)))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
