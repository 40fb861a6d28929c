//! Key wrapping tests: round trips, wrong-session rejection, tamper
//! detection and compatibility with both stored blob encodings.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use logvault_crypto::{
    CryptoError, DEFAULT_KDF_ITERATIONS, KdfDescriptor, KdfParams, KdfSalt,
    LEGACY_DERIVATION_SALT, MasterKey, NONCE_SIZE, Salt, SessionId, TAG_SIZE, WrapFormat,
    WrappedMasterKey, unwrap_master_key, wrap_master_key,
};
use pbkdf2::pbkdf2_hmac;
use proptest::prelude::*;
use sha2::Sha256;

fn session(id: &str) -> SessionId {
    SessionId::new(id).unwrap()
}

/// Reproduces the historic client-side wrapping: fixed salt, 12-byte IV,
/// base64 key text sealed and concatenated after the IV.
fn legacy_client_wrap(key: &MasterKey, session_id: &str) -> String {
    let mut wrapping_key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        session_id.as_bytes(),
        LEGACY_DERIVATION_SALT,
        DEFAULT_KDF_ITERATIONS,
        &mut wrapping_key,
    );
    let nonce = [0x11u8; 12];
    let sealed = Aes256Gcm::new(GenericArray::from_slice(&wrapping_key))
        .encrypt(GenericArray::from_slice(&nonce), key.to_base64().as_bytes())
        .unwrap();
    WrapFormat::Legacy { nonce, sealed }.encode()
}

/// Canonical blob under a cheap per-user descriptor, so tests can afford
/// one unwrap per byte.
fn fast_canonical_wrap(key: &MasterKey, session_id: &str) -> WrappedMasterKey {
    let kdf = KdfDescriptor {
        salt: KdfSalt::PerUser(Salt::from_bytes([7u8; 16])),
        iterations: 1_000,
    };
    let mut wrapping_key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        session_id.as_bytes(),
        kdf.salt.as_bytes(),
        kdf.iterations,
        &mut wrapping_key,
    );
    let nonce = [0x22u8; NONCE_SIZE];
    let mut ciphertext = Aes256Gcm::new(GenericArray::from_slice(&wrapping_key))
        .encrypt(GenericArray::from_slice(&nonce), key.to_base64().as_bytes())
        .unwrap();
    let tag: [u8; TAG_SIZE] = ciphertext
        .split_off(ciphertext.len() - TAG_SIZE)
        .try_into()
        .unwrap();
    let blob = WrapFormat::Canonical {
        nonce: nonce.to_vec(),
        tag,
        ciphertext,
    }
    .encode();
    WrappedMasterKey { blob, kdf }
}

fn tampered_blob(blob: &str, segment: usize, index: usize) -> String {
    let mut parts: Vec<String> = blob.split('.').map(str::to_string).collect();
    let mut bytes = STANDARD.decode(&parts[segment]).unwrap();
    bytes[index] ^= 0x01;
    parts[segment] = STANDARD.encode(bytes);
    parts.join(".")
}

#[test]
fn canonical_blob_round_trips_with_per_user_salt() {
    let key = MasterKey::generate().unwrap();
    let wrapped = wrap_master_key(&key, &session("session-1"), &KdfParams::default()).unwrap();

    assert!(matches!(wrapped.kdf.salt, KdfSalt::PerUser(_)));
    assert_eq!(wrapped.kdf.iterations, DEFAULT_KDF_ITERATIONS);
    assert!(!wrapped.format().unwrap().is_legacy());

    let opened = unwrap_master_key(&wrapped, &session("session-1")).unwrap();
    assert_eq!(opened.as_bytes(), key.as_bytes());
}

#[test]
fn same_key_wrapped_twice_gets_distinct_salts_and_blobs() {
    let key = MasterKey::generate().unwrap();
    let a = wrap_master_key(&key, &session("s"), &KdfParams::default()).unwrap();
    let b = wrap_master_key(&key, &session("s"), &KdfParams::default()).unwrap();
    assert_ne!(a.kdf.salt, b.kdf.salt);
    assert_ne!(a.blob, b.blob);
}

#[test]
fn wrong_session_rejected() {
    let key = MasterKey::generate().unwrap();
    let wrapped = wrap_master_key(&key, &session("right"), &KdfParams::default()).unwrap();

    let err = unwrap_master_key(&wrapped, &session("wrong")).unwrap_err();
    assert!(matches!(err, CryptoError::UnwrapAuthentication(_)));
}

#[test]
fn wrong_salt_rejected() {
    let key = MasterKey::generate().unwrap();
    let mut wrapped = wrap_master_key(&key, &session("s"), &KdfParams::default()).unwrap();
    wrapped.kdf = KdfDescriptor::legacy();

    assert!(unwrap_master_key(&wrapped, &session("s")).is_err());
}

#[test]
fn every_nonce_tag_and_ciphertext_byte_tampering_detected() {
    let key = MasterKey::generate().unwrap();
    let sid = session("s");
    let wrapped = fast_canonical_wrap(&key, "s");
    assert_eq!(
        unwrap_master_key(&wrapped, &sid).unwrap().as_bytes(),
        key.as_bytes()
    );

    let segments: Vec<usize> = wrapped
        .blob
        .split('.')
        .map(|part| STANDARD.decode(part).unwrap().len())
        .collect();
    assert_eq!(segments[0], NONCE_SIZE);
    assert_eq!(segments[1], TAG_SIZE);

    for (segment, len) in segments.into_iter().enumerate() {
        for index in 0..len {
            let tampered = WrappedMasterKey {
                blob: tampered_blob(&wrapped.blob, segment, index),
                kdf: wrapped.kdf,
            };
            let err = unwrap_master_key(&tampered, &sid).unwrap_err();
            assert!(
                matches!(err, CryptoError::UnwrapAuthentication(_)),
                "segment {segment} byte {index}: {err:?}"
            );
        }
    }
}

#[test]
fn tampering_detected_at_default_cost() {
    let key = MasterKey::generate().unwrap();
    let sid = session("s");
    let wrapped = wrap_master_key(&key, &sid, &KdfParams::default()).unwrap();

    for (segment, index) in [(0, 0), (1, 15), (2, 0)] {
        let tampered = WrappedMasterKey {
            blob: tampered_blob(&wrapped.blob, segment, index),
            kdf: wrapped.kdf,
        };
        assert!(matches!(
            unwrap_master_key(&tampered, &sid),
            Err(CryptoError::UnwrapAuthentication(_))
        ));
    }
}

#[test]
fn garbage_blob_fails_closed() {
    for blob in ["", "not base64 at all!", "a.b", "AAAA.AAAA.AAAA"] {
        let err = unwrap_master_key(&WrappedMasterKey::legacy(blob), &session("s")).unwrap_err();
        assert!(matches!(err, CryptoError::UnwrapAuthentication(_)), "{blob}: {err:?}");
    }
}

#[test]
fn missing_session_identifier_is_key_derivation_error() {
    let err = SessionId::new("").unwrap_err();
    assert!(matches!(err, CryptoError::KeyDerivation(_)));
    assert!(err.is_key_level());
}

#[test]
fn legacy_and_canonical_blobs_both_unwrap() {
    let key = MasterKey::generate().unwrap();
    let sid = "user-42";

    let legacy = WrappedMasterKey::legacy(legacy_client_wrap(&key, sid));
    assert!(legacy.format().unwrap().is_legacy());
    let canonical = wrap_master_key(&key, &session(sid), &KdfParams::default()).unwrap();

    assert_eq!(
        unwrap_master_key(&legacy, &session(sid)).unwrap().as_bytes(),
        key.as_bytes()
    );
    assert_eq!(
        unwrap_master_key(&canonical, &session(sid)).unwrap().as_bytes(),
        key.as_bytes()
    );
}

#[test]
fn legacy_blob_with_wrong_session_rejected() {
    let key = MasterKey::generate().unwrap();
    let legacy = WrappedMasterKey::legacy(legacy_client_wrap(&key, "user-42"));
    assert!(matches!(
        unwrap_master_key(&legacy, &session("user-43")),
        Err(CryptoError::UnwrapAuthentication(_))
    ));
}

#[test]
fn wrapped_key_serializes_with_kdf_descriptor() {
    let key = MasterKey::generate().unwrap();
    let wrapped = wrap_master_key(&key, &session("s"), &KdfParams::default()).unwrap();
    let json = serde_json::to_string(&wrapped).unwrap();
    let back: WrappedMasterKey = serde_json::from_str(&json).unwrap();
    assert_eq!(back, wrapped);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn wrap_unwrap_identity(bytes in any::<[u8; 32]>(), sid in "[ -~]{1,48}") {
        prop_assume!(!sid.trim().is_empty());
        let key = MasterKey::from_bytes(bytes);
        let session = SessionId::new(sid).unwrap();
        let wrapped = wrap_master_key(&key, &session, &KdfParams::default()).unwrap();
        let opened = unwrap_master_key(&wrapped, &session).unwrap();
        prop_assert_eq!(opened.as_bytes(), key.as_bytes());
    }
}
