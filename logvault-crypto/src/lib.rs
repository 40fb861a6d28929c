//! Envelope encryption layer for LogVault.
//!
//! Protects user-authored free text (goals, journal entries) at rest using:
//! - PBKDF2-HMAC-SHA256 to derive a wrapping key from the session identifier
//! - AES-256-GCM for both key wrapping and record encryption
//! - Zeroization of key material on drop
//!
//! # Architecture
//!
//! 1. **Master Key**: 256 random bits per user, generated once. Stored only
//!    in wrapped form.
//!
//! 2. **Wrapping Key**: derived from the session identifier, a per-user salt
//!    and an iteration count. Never stored.
//!
//! 3. **Records**: each payload is serialized to JSON and sealed under the
//!    master key with a fresh random nonce.
//!
//! # Threat model
//!
//! This protects against an adversary who can read the key and record
//! stores and nothing else. The wrapping key is a function of the session
//! identifier, which the application server also sees, so a compromised
//! server or leaked session token can unwrap the master key.

mod cipher;
mod error;
mod key;
pub mod record;
pub mod wrap;

pub use cipher::{NONCE_SIZE, TAG_SIZE, WIDE_NONCE_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    DEFAULT_KDF_ITERATIONS, KEY_SIZE, KdfDescriptor, KdfParams, KdfSalt,
    LEGACY_DERIVATION_SALT, MIN_KDF_ITERATIONS, MasterKey, SALT_SIZE, Salt, SessionId,
};
pub use record::{EncryptedRecord, decrypt_record, encrypt_record};
pub use wrap::{WrapFormat, WrappedMasterKey, unwrap as unwrap_master_key, wrap as wrap_master_key};
