//! AES-256-GCM primitives shared by key wrapping and record encryption.
//!
//! Sealed output is `ciphertext || tag`, the usual AEAD layout. Nonces are
//! drawn from the OS random source on every call and never derived from
//! content or counters.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KEY_SIZE;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm};
use rand::TryRngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Standard 96-bit GCM nonce. Everything new is sealed with this width.
pub const NONCE_SIZE: usize = 12;

/// 128-bit nonce found on historic server-wrapped keys.
pub const WIDE_NONCE_SIZE: usize = 16;

/// GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

type Aes256GcmWide = AesGcm<Aes256, U16>;

/// Fills an array from the OS random source.
pub(crate) fn random_bytes<const N: usize>() -> CryptoResult<[u8; N]> {
    let mut out = [0u8; N];
    OsRng
        .try_fill_bytes(&mut out)
        .map_err(|e| CryptoError::Encryption(format!("random source unavailable: {e}")))?;
    Ok(out)
}

pub(crate) fn generate_nonce() -> CryptoResult<[u8; NONCE_SIZE]> {
    random_bytes::<NONCE_SIZE>()
}

/// Seals `plaintext` under a 96-bit nonce.
pub(crate) fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    cipher
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::Encryption("AES-GCM seal failed".to_string()))
}

/// Opens `ciphertext || tag` under a 96- or 128-bit nonce.
///
/// Returns `None` when the tag does not verify or the nonce width is
/// unsupported; callers map that to their own failure variant.
pub(crate) fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
    sealed: &[u8],
) -> Option<Zeroizing<Vec<u8>>> {
    let plaintext = match nonce.len() {
        NONCE_SIZE => Aes256Gcm::new(GenericArray::from_slice(key))
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .ok()?,
        WIDE_NONCE_SIZE => Aes256GcmWide::new(GenericArray::from_slice(key))
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .ok()?,
        _ => return None,
    };
    Some(Zeroizing::new(plaintext))
}

/// Seals under a 128-bit nonce. Only historic server blobs use this width.
#[cfg(test)]
pub(crate) fn seal_wide(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; WIDE_NONCE_SIZE],
    plaintext: &[u8],
) -> Vec<u8> {
    Aes256GcmWide::new(GenericArray::from_slice(key))
        .encrypt(GenericArray::from_slice(nonce), plaintext)
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_appends_tag() {
        let key = [1u8; KEY_SIZE];
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&key, &nonce, b"abc").unwrap();
        assert_eq!(sealed.len(), 3 + TAG_SIZE);
        assert_eq!(open(&key, &nonce, &sealed).unwrap().as_slice(), b"abc");
    }

    #[test]
    fn wide_nonce_round_trip() {
        let key = [2u8; KEY_SIZE];
        let nonce = [9u8; WIDE_NONCE_SIZE];
        let sealed = seal_wide(&key, &nonce, b"server side");
        assert_eq!(open(&key, &nonce, &sealed).unwrap().as_slice(), b"server side");
    }

    #[test]
    fn unsupported_nonce_width_fails() {
        let key = [3u8; KEY_SIZE];
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&key, &nonce, b"abc").unwrap();
        assert!(open(&key, &nonce[..8], &sealed).is_none());
    }

    #[test]
    fn wrong_key_fails() {
        let nonce = generate_nonce().unwrap();
        let sealed = seal(&[4u8; KEY_SIZE], &nonce, b"abc").unwrap();
        assert!(open(&[5u8; KEY_SIZE], &nonce, &sealed).is_none());
    }

    #[test]
    fn nonces_are_random() {
        assert_ne!(generate_nonce().unwrap(), generate_nonce().unwrap());
    }
}
