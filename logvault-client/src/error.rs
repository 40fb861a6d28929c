//! Vault error types.

use logvault_crypto::CryptoError;
use logvault_store::StorageError;
use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors surfaced by the key provider and record sessions.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The session has no usable master key, so nothing can be written.
    #[error("encryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        VaultError::Task(err.to_string())
    }
}
