//! Key wrapping service.
//!
//! Seals a user's master key under a key derived from the session
//! identifier. Two blob encodings exist in storage:
//!
//! - Canonical: `base64(nonce) "." base64(tag) "." base64(ciphertext)`.
//!   This is the only encoding produced.
//! - Legacy: `base64(nonce || ciphertext || tag)`, 12-byte nonce, no separators.
//!
//! Blobs are parsed into [`WrapFormat`] before any decryption happens.

use crate::cipher::{self, NONCE_SIZE, TAG_SIZE, WIDE_NONCE_SIZE};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KEY_SIZE, KdfDescriptor, KdfParams, MasterKey, SessionId, derive_wrapping_key};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

const SEPARATOR: char = '.';

/// A sealed master key plus the KDF settings needed to open it.
///
/// Exactly one exists per user and it never changes once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedMasterKey {
    /// Encoded blob, see [`WrapFormat`].
    pub blob: String,
    pub kdf: KdfDescriptor,
}

impl WrappedMasterKey {
    /// Wraps a blob persisted before per-user salts were introduced.
    pub fn legacy(blob: impl Into<String>) -> Self {
        Self {
            blob: blob.into(),
            kdf: KdfDescriptor::legacy(),
        }
    }

    /// Parses the blob without opening it.
    pub fn format(&self) -> CryptoResult<WrapFormat> {
        WrapFormat::parse(&self.blob)
    }
}

/// Decoded wrapped-key blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WrapFormat {
    /// Dot-delimited triple. The nonce is 12 bytes, or 16 on historic
    /// server-produced blobs.
    Canonical {
        nonce: Vec<u8>,
        tag: [u8; TAG_SIZE],
        ciphertext: Vec<u8>,
    },
    /// Single base64 run of `nonce || ciphertext || tag`.
    Legacy {
        nonce: [u8; NONCE_SIZE],
        sealed: Vec<u8>,
    },
}

impl WrapFormat {
    /// Decodes a blob string into its variant.
    ///
    /// Two separators select the canonical variant, none selects the legacy
    /// one. The standard base64 alphabet never contains `.`, so the split is
    /// unambiguous.
    pub fn parse(blob: &str) -> CryptoResult<Self> {
        let blob = blob.trim();
        let parts: Vec<&str> = blob.split(SEPARATOR).collect();
        match parts.as_slice() {
            [nonce, tag, ciphertext] => Self::parse_canonical(nonce, tag, ciphertext),
            [single] => Self::parse_legacy(single),
            _ => Err(malformed(format!(
                "expected 1 or 3 segments, got {}",
                parts.len()
            ))),
        }
    }

    fn parse_canonical(nonce: &str, tag: &str, ciphertext: &str) -> CryptoResult<Self> {
        let nonce = decode_segment("nonce", nonce)?;
        if nonce.len() != NONCE_SIZE && nonce.len() != WIDE_NONCE_SIZE {
            return Err(malformed(format!("unsupported nonce length {}", nonce.len())));
        }
        let tag = decode_segment("tag", tag)?;
        let tag = <[u8; TAG_SIZE]>::try_from(tag.as_slice())
            .map_err(|_| malformed(format!("tag must be {TAG_SIZE} bytes, got {}", tag.len())))?;
        let ciphertext = decode_segment("ciphertext", ciphertext)?;
        if ciphertext.is_empty() {
            return Err(malformed("empty ciphertext".to_string()));
        }
        Ok(WrapFormat::Canonical {
            nonce,
            tag,
            ciphertext,
        })
    }

    fn parse_legacy(encoded: &str) -> CryptoResult<Self> {
        let bytes = decode_segment("blob", encoded)?;
        if bytes.len() <= NONCE_SIZE + TAG_SIZE {
            return Err(malformed(format!("legacy blob too short ({} bytes)", bytes.len())));
        }
        let (nonce, sealed) = bytes.split_at(NONCE_SIZE);
        let nonce = <[u8; NONCE_SIZE]>::try_from(nonce)
            .map_err(|_| malformed("legacy nonce".to_string()))?;
        Ok(WrapFormat::Legacy {
            nonce,
            sealed: sealed.to_vec(),
        })
    }

    /// Encodes back to the blob string for this variant.
    pub fn encode(&self) -> String {
        match self {
            WrapFormat::Canonical {
                nonce,
                tag,
                ciphertext,
            } => format!(
                "{}{SEPARATOR}{}{SEPARATOR}{}",
                STANDARD.encode(nonce),
                STANDARD.encode(tag),
                STANDARD.encode(ciphertext)
            ),
            WrapFormat::Legacy { nonce, sealed } => {
                let mut bytes = Vec::with_capacity(nonce.len() + sealed.len());
                bytes.extend_from_slice(nonce);
                bytes.extend_from_slice(sealed);
                STANDARD.encode(bytes)
            }
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, WrapFormat::Legacy { .. })
    }

    fn open(&self, key: &[u8; KEY_SIZE]) -> Option<Zeroizing<Vec<u8>>> {
        match self {
            WrapFormat::Canonical {
                nonce,
                tag,
                ciphertext,
            } => {
                let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
                sealed.extend_from_slice(ciphertext);
                sealed.extend_from_slice(tag);
                cipher::open(key, nonce, &sealed)
            }
            WrapFormat::Legacy { nonce, sealed } => cipher::open(key, nonce, sealed),
        }
    }
}

/// Seals `master_key` under a key derived from `session` and a fresh salt.
pub fn wrap(
    master_key: &MasterKey,
    session: &SessionId,
    params: &KdfParams,
) -> CryptoResult<WrappedMasterKey> {
    let kdf = KdfDescriptor::fresh(params)?;
    let wrapping_key = derive_wrapping_key(session, &kdf)?;
    let nonce = cipher::generate_nonce()?;

    let plaintext = master_key.to_base64();
    let mut sealed = cipher::seal(wrapping_key.as_bytes(), &nonce, plaintext.as_bytes())?;
    let tag_bytes = sealed.split_off(sealed.len() - TAG_SIZE);
    let tag = <[u8; TAG_SIZE]>::try_from(tag_bytes.as_slice())
        .map_err(|_| CryptoError::Encryption("AES-GCM produced a short tag".to_string()))?;

    let format = WrapFormat::Canonical {
        nonce: nonce.to_vec(),
        tag,
        ciphertext: sealed,
    };
    Ok(WrappedMasterKey {
        blob: format.encode(),
        kdf,
    })
}

/// Opens a wrapped master key.
///
/// Fails closed: any parse or authentication failure is
/// [`CryptoError::UnwrapAuthentication`] and no key material is returned.
pub fn unwrap(wrapped: &WrappedMasterKey, session: &SessionId) -> CryptoResult<MasterKey> {
    let format = wrapped.format()?;
    let wrapping_key = derive_wrapping_key(session, &wrapped.kdf)?;
    let plaintext = format.open(wrapping_key.as_bytes()).ok_or_else(|| {
        CryptoError::UnwrapAuthentication(
            "authentication tag mismatch (wrong session or tampered blob)".to_string(),
        )
    })?;
    if format.is_legacy() {
        debug!("unwrapped master key from legacy concatenated blob");
    }
    MasterKey::from_unwrapped(&plaintext)
}

fn decode_segment(name: &str, segment: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(segment)
        .map_err(|e| malformed(format!("{name} is not valid base64: {e}")))
}

fn malformed(reason: String) -> CryptoError {
    CryptoError::UnwrapAuthentication(format!("malformed wrapped key: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KdfSalt, derive_wrapping_key};

    fn session(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    #[test]
    fn wrap_produces_canonical_triple() {
        let key = MasterKey::generate().unwrap();
        let wrapped = wrap(&key, &session("s1"), &KdfParams::fast_for_tests()).unwrap();

        assert_eq!(wrapped.blob.matches('.').count(), 2);
        assert!(matches!(wrapped.kdf.salt, KdfSalt::PerUser(_)));
        match wrapped.format().unwrap() {
            WrapFormat::Canonical { nonce, .. } => assert_eq!(nonce.len(), NONCE_SIZE),
            other => panic!("expected canonical, got {other:?}"),
        }
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let key = MasterKey::generate().unwrap();
        let wrapped = wrap(&key, &session("s1"), &KdfParams::fast_for_tests()).unwrap();
        let opened = unwrap(&wrapped, &session("s1")).unwrap();
        assert_eq!(opened.as_bytes(), key.as_bytes());
    }

    #[test]
    fn wrong_session_fails_closed() {
        let key = MasterKey::generate().unwrap();
        let wrapped = wrap(&key, &session("s1"), &KdfParams::fast_for_tests()).unwrap();
        let err = unwrap(&wrapped, &session("s2")).unwrap_err();
        assert!(matches!(err, CryptoError::UnwrapAuthentication(_)));
    }

    #[test]
    fn historic_server_blob_with_wide_nonce_unwraps() {
        // Legacy server wrapping: fixed salt, 16-byte IV, base64 key text sealed.
        let key = MasterKey::generate().unwrap();
        let sid = session("user-abc");
        let kdf = KdfDescriptor::legacy();
        let wk = derive_wrapping_key(&sid, &kdf).unwrap();
        let nonce = [0x42u8; WIDE_NONCE_SIZE];
        let mut sealed = cipher::seal_wide(wk.as_bytes(), &nonce, key.to_base64().as_bytes());
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);
        let blob = format!(
            "{}.{}.{}",
            STANDARD.encode(nonce),
            STANDARD.encode(&tag),
            STANDARD.encode(&sealed)
        );

        let opened = unwrap(&WrappedMasterKey::legacy(blob), &sid).unwrap();
        assert_eq!(opened.as_bytes(), key.as_bytes());
    }

    #[test]
    fn legacy_concatenated_blob_unwraps() {
        let key = MasterKey::generate().unwrap();
        let sid = session("user-abc");
        let wk = derive_wrapping_key(&sid, &KdfDescriptor::legacy()).unwrap();
        let nonce = cipher::generate_nonce().unwrap();
        let sealed = cipher::seal(wk.as_bytes(), &nonce, key.to_base64().as_bytes()).unwrap();
        let blob = WrapFormat::Legacy { nonce, sealed }.encode();

        assert!(!blob.contains('.'));
        let opened = unwrap(&WrappedMasterKey::legacy(blob), &sid).unwrap();
        assert_eq!(opened.as_bytes(), key.as_bytes());
    }

    #[test]
    fn parse_rejects_wrong_segment_count() {
        assert!(WrapFormat::parse("a.b").is_err());
        assert!(WrapFormat::parse("a.b.c.d").is_err());
    }

    #[test]
    fn parse_rejects_bad_nonce_and_tag_lengths() {
        let short_nonce = format!(
            "{}.{}.{}",
            STANDARD.encode([0u8; 8]),
            STANDARD.encode([0u8; TAG_SIZE]),
            STANDARD.encode([0u8; 44])
        );
        assert!(WrapFormat::parse(&short_nonce).is_err());

        let short_tag = format!(
            "{}.{}.{}",
            STANDARD.encode([0u8; NONCE_SIZE]),
            STANDARD.encode([0u8; 8]),
            STANDARD.encode([0u8; 44])
        );
        assert!(WrapFormat::parse(&short_tag).is_err());
    }

    #[test]
    fn parse_rejects_short_legacy_blob() {
        let blob = STANDARD.encode([0u8; NONCE_SIZE + TAG_SIZE]);
        assert!(matches!(
            WrapFormat::parse(&blob),
            Err(CryptoError::UnwrapAuthentication(_))
        ));
    }

    #[test]
    fn encode_parse_preserves_canonical_variant() {
        let format = WrapFormat::Canonical {
            nonce: vec![1; NONCE_SIZE],
            tag: [2; TAG_SIZE],
            ciphertext: vec![3; 44],
        };
        assert_eq!(WrapFormat::parse(&format.encode()).unwrap(), format);
    }
}
