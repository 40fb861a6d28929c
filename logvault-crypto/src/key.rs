//! Key material and PBKDF2 derivation.
//!
//! The master key is random and never leaves memory in clear form. The
//! wrapping key is re-derived on demand from the session identifier, the
//! salt and the iteration count recorded next to the wrapped blob.

use crate::cipher::random_bytes;
use crate::error::{CryptoError, CryptoResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the master key and the wrapping key in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of a per-user KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Lowest PBKDF2-HMAC-SHA256 iteration count accepted for new keys.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Iteration count used for new keys and for every legacy key.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Application-wide salt used by keys wrapped before per-user salts existed.
pub const LEGACY_DERIVATION_SALT: &[u8] = b"logbook-encryption-salt";

/// A user's 256-bit master key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generates a fresh key from the OS random source.
    pub fn generate() -> CryptoResult<Self> {
        Ok(Self {
            bytes: random_bytes::<KEY_SIZE>()?,
        })
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Standard base64 text of the key, as sealed inside a wrapped blob.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.bytes))
    }

    /// Rebuilds a key from unwrapped plaintext.
    ///
    /// Accepts the raw 32 bytes or the base64 text of them.
    pub fn from_unwrapped(plaintext: &[u8]) -> CryptoResult<Self> {
        if let Ok(raw) = <[u8; KEY_SIZE]>::try_from(plaintext) {
            return Ok(Self::from_bytes(raw));
        }
        let decoded = Zeroizing::new(STANDARD.decode(plaintext).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: plaintext.len(),
            }
        })?);
        let raw = <[u8; KEY_SIZE]>::try_from(decoded.as_slice()).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: decoded.len(),
            }
        })?;
        Ok(Self::from_bytes(raw))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Key derived from a session identifier, used only to seal the master key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct WrappingKey([u8; KEY_SIZE]);

impl WrappingKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Opaque per-session identifier supplied by the authentication layer.
///
/// Whoever holds this value can unwrap the user's master key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a session identifier, rejecting empty input.
    pub fn new(value: impl Into<String>) -> CryptoResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CryptoError::KeyDerivation(
                "missing session identifier".to_string(),
            ));
        }
        Ok(Self(value))
    }

    fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(..)")
    }
}

/// Random per-user KDF salt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> CryptoResult<Self> {
        Ok(Self(random_bytes::<SALT_SIZE>()?))
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::KeyDerivation(format!("salt is not base64: {e}")))?;
        let bytes = <[u8; SALT_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
            CryptoError::KeyDerivation(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

/// Salt a wrapped key was derived with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "salt", rename_all = "snake_case")]
pub enum KdfSalt {
    /// The historic application-wide salt.
    Legacy,
    /// A random salt stored alongside this user's wrapped key.
    PerUser(Salt),
}

impl KdfSalt {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            KdfSalt::Legacy => LEGACY_DERIVATION_SALT,
            KdfSalt::PerUser(salt) => salt.as_bytes(),
        }
    }
}

/// PBKDF2 cost settings for newly wrapped keys.
///
/// Serialized as the bare iteration count; deserializing enforces the
/// same minimum as [`KdfParams::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct KdfParams {
    iterations: u32,
}

impl KdfParams {
    /// Builds parameters, rejecting iteration counts below the minimum.
    pub fn new(iterations: u32) -> CryptoResult<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(CryptoError::KeyDerivation(format!(
                "iteration count {iterations} is below the minimum of {MIN_KDF_ITERATIONS}"
            )));
        }
        Ok(Self { iterations })
    }

    /// Cheap parameters so test suites don't spend seconds per wrap.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fast_for_tests() -> Self {
        Self { iterations: 1_000 }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl TryFrom<u32> for KdfParams {
    type Error = CryptoError;

    fn try_from(iterations: u32) -> CryptoResult<Self> {
        Self::new(iterations)
    }
}

impl From<KdfParams> for u32 {
    fn from(params: KdfParams) -> Self {
        params.iterations
    }
}

/// Everything besides the session identifier needed to re-derive a
/// wrapping key. Persisted next to the wrapped blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfDescriptor {
    pub salt: KdfSalt,
    pub iterations: u32,
}

impl KdfDescriptor {
    /// Descriptor for keys wrapped under the application-wide salt.
    pub fn legacy() -> Self {
        Self {
            salt: KdfSalt::Legacy,
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    /// Descriptor with a fresh random salt.
    pub fn fresh(params: &KdfParams) -> CryptoResult<Self> {
        Ok(Self {
            salt: KdfSalt::PerUser(Salt::random()?),
            iterations: params.iterations(),
        })
    }
}

/// Derives the wrapping key for `session` with PBKDF2-HMAC-SHA256.
pub(crate) fn derive_wrapping_key(
    session: &SessionId,
    kdf: &KdfDescriptor,
) -> CryptoResult<WrappingKey> {
    if kdf.iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "iteration count must be non-zero".to_string(),
        ));
    }
    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(session.expose(), kdf.salt.as_bytes(), kdf.iterations, &mut out);
    Ok(WrappingKey(out))
}
