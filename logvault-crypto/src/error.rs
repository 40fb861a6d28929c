//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while deriving, wrapping or using key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// KDF input is malformed (e.g. missing session identifier).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The wrapped master key could not be opened with the derived key.
    #[error("master key unwrap failed: {0}")]
    UnwrapAuthentication(String),

    /// The AEAD primitive or the random source failed while sealing.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// A record could not be authenticated or deserialized.
    #[error("record decryption failed: {0}")]
    RecordDecryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

impl CryptoError {
    /// Whether this failure affects the whole session's key material rather
    /// than a single record.
    pub fn is_key_level(&self) -> bool {
        matches!(
            self,
            CryptoError::KeyDerivation(_)
                | CryptoError::UnwrapAuthentication(_)
                | CryptoError::InvalidKeyLength { .. }
        )
    }
}
