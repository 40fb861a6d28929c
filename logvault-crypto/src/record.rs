//! Record cipher.
//!
//! Encrypts structured payloads under the unwrapped master key. Each call
//! draws a fresh 96-bit nonce; the ciphertext carries the GCM tag appended.

use crate::cipher::{self, NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::MasterKey;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Base64 `{ciphertext, nonce}` pair as persisted on a record row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// `base64(ciphertext || tag)`.
    pub ciphertext: String,
    /// `base64(nonce)`, 12 bytes.
    pub nonce: String,
}

/// Serializes `payload` to JSON and seals it under `key`.
pub fn encrypt_record<T>(payload: &T, key: &MasterKey) -> CryptoResult<EncryptedRecord>
where
    T: Serialize + ?Sized,
{
    let plaintext = zeroize::Zeroizing::new(
        serde_json::to_vec(payload)
            .map_err(|e| CryptoError::Encryption(format!("payload serialization: {e}")))?,
    );
    let nonce = cipher::generate_nonce()?;
    let sealed = cipher::seal(key.as_bytes(), &nonce, &plaintext)?;

    Ok(EncryptedRecord {
        ciphertext: STANDARD.encode(sealed),
        nonce: STANDARD.encode(nonce),
    })
}

/// Opens a record and deserializes its payload.
///
/// Authentication failures and payloads that authenticate but do not
/// deserialize are both [`CryptoError::RecordDecryption`]. Nothing partial
/// is ever returned.
pub fn decrypt_record<T>(ciphertext: &str, nonce: &str, key: &MasterKey) -> CryptoResult<T>
where
    T: DeserializeOwned,
{
    let sealed = STANDARD
        .decode(ciphertext)
        .map_err(|e| CryptoError::RecordDecryption(format!("ciphertext is not base64: {e}")))?;
    let nonce = STANDARD
        .decode(nonce)
        .map_err(|e| CryptoError::RecordDecryption(format!("nonce is not base64: {e}")))?;
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::RecordDecryption(format!(
            "nonce must be {NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }

    let plaintext = cipher::open(key.as_bytes(), &nonce, &sealed).ok_or_else(|| {
        CryptoError::RecordDecryption(
            "authentication tag mismatch (wrong key or tampered data)".to_string(),
        )
    })?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| CryptoError::RecordDecryption(format!("payload deserialization: {e}")))
}

impl EncryptedRecord {
    /// Shorthand for [`decrypt_record`] on this pair.
    pub fn open<T: DeserializeOwned>(&self, key: &MasterKey) -> CryptoResult<T> {
        decrypt_record(&self.ciphertext, &self.nonce, key)
    }
}
