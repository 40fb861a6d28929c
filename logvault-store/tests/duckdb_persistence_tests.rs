//! On-disk DuckDB persistence across reopen.

use logvault_crypto::{
    KdfParams, MasterKey, SessionId, encrypt_record, unwrap_master_key, wrap_master_key,
};
use logvault_store::{DuckDbStore, KeyStore, RecordKind, RecordStore};
use serde_json::{Value, json};

#[tokio::test]
async fn wrapped_key_and_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logvault.duckdb");
    let session = SessionId::new("session-token").unwrap();
    let key = MasterKey::generate().unwrap();
    let payload = json!({"text": "Finish report", "isCompleted": false});

    let record_id = {
        let store = DuckDbStore::open(&path, "64MB", 1).unwrap();
        let wrapped = wrap_master_key(&key, &session, &KdfParams::fast_for_tests()).unwrap();
        store.insert_wrapped_key_if_absent("u1", &wrapped).await.unwrap();
        let sealed = encrypt_record(&payload, &key).unwrap();
        store.insert_record("u1", RecordKind::Goal, &sealed).await.unwrap().id
    };

    let store = DuckDbStore::open(&path, "64MB", 1).unwrap();
    let wrapped = store.get_wrapped_key("u1").await.unwrap().unwrap();
    let reopened_key = unwrap_master_key(&wrapped, &session).unwrap();
    assert_eq!(reopened_key.as_bytes(), key.as_bytes());

    let record = store.get_record("u1", RecordKind::Goal, record_id).await.unwrap();
    let decrypted: Value = record.sealed.unwrap().open(&reopened_key).unwrap();
    assert_eq!(decrypted, payload);
}

#[tokio::test]
async fn stored_columns_hold_no_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logvault.duckdb");
    let store = DuckDbStore::open(&path, "64MB", 1).unwrap();
    let key = MasterKey::generate().unwrap();

    let sealed = encrypt_record(&json!({"thoughts": "a very private thought"}), &key).unwrap();
    let record = store
        .insert_record("u1", RecordKind::JournalEntry, &sealed)
        .await
        .unwrap();

    let stored = record.sealed.unwrap();
    assert!(!stored.ciphertext.contains("private"));
    assert!(record.legacy.is_empty());
}
