//! Per-session record orchestration.
//!
//! A [`VaultSession`] unwraps the user's master key once, decrypts records
//! on load and re-encrypts complete payloads on every write. If the key
//! cannot be unwrapped the session stays readable through legacy plaintext
//! fields but refuses all writes.

use crate::error::{VaultError, VaultResult};
use logvault_crypto::{
    CryptoResult, MasterKey, SessionId, WrappedMasterKey, encrypt_record, unwrap_master_key,
};
use logvault_store::{RecordKind, RecordStore, StoredRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a session could make of one record's content.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordContent {
    /// Decrypted payload, with legacy fields filling any gaps.
    Decrypted(Value),
    /// Legacy plaintext fields, shown because decryption was not possible.
    Fallback(Value),
    /// Neither a decryptable payload nor legacy fields are available.
    Unreadable,
}

impl RecordContent {
    /// The displayable value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            RecordContent::Decrypted(v) | RecordContent::Fallback(v) => Some(v),
            RecordContent::Unreadable => None,
        }
    }

    pub fn is_decrypted(&self) -> bool {
        matches!(self, RecordContent::Decrypted(_))
    }
}

/// A stored record together with its resolved content.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordView {
    pub record: StoredRecord,
    pub content: RecordContent,
}

impl RecordView {
    /// Deserializes the displayable value into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Option<T> {
        self.content
            .value()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Key state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Master key unwrapped; reads decrypt and writes encrypt.
    Unwrapped,
    /// No usable key; reads fall back to legacy fields, writes are refused.
    Degraded,
}

enum KeyMaterial {
    Unwrapped(MasterKey),
    Unavailable { reason: String },
}

/// One user's view of one record kind for the lifetime of a session.
pub struct VaultSession<S: ?Sized> {
    store: Arc<S>,
    owner_id: String,
    kind: RecordKind,
    key: KeyMaterial,
}

impl<S: RecordStore + ?Sized> VaultSession<S> {
    /// Opens a session by unwrapping `wrapped` with the key derived from
    /// `session_id`.
    ///
    /// Key-level failures do not fail the call: a missing wrapped key, an
    /// empty session identifier or a blob that will not open all leave the
    /// session in [`SessionMode::Degraded`] for its whole lifetime.
    pub async fn open(
        store: Arc<S>,
        owner_id: impl Into<String>,
        wrapped: Option<WrappedMasterKey>,
        session_id: &str,
        kind: RecordKind,
    ) -> VaultResult<Self> {
        let owner_id = owner_id.into();
        let key = match wrapped {
            None => {
                warn!("no master key stored for user {owner_id}, opening read-only");
                KeyMaterial::Unavailable {
                    reason: "no master key provisioned".to_string(),
                }
            }
            Some(wrapped) => match unwrap_for_session(wrapped, session_id).await? {
                Ok(key) => {
                    debug!("unwrapped master key for user {owner_id}");
                    KeyMaterial::Unwrapped(key)
                }
                Err(e) if e.is_key_level() => {
                    warn!("master key unavailable for user {owner_id}: {e}");
                    KeyMaterial::Unavailable {
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e.into()),
            },
        };
        Ok(Self {
            store,
            owner_id,
            kind,
            key,
        })
    }

    pub fn mode(&self) -> SessionMode {
        match self.key {
            KeyMaterial::Unwrapped(_) => SessionMode::Unwrapped,
            KeyMaterial::Unavailable { .. } => SessionMode::Degraded,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Lists and resolves every record of this session's kind.
    ///
    /// Per-record failures only affect that record's [`RecordContent`].
    pub async fn load(&self) -> VaultResult<Vec<RecordView>> {
        let records = self.store.list_records(&self.owner_id, self.kind).await?;
        Ok(records.into_iter().map(|r| self.resolve(r)).collect())
    }

    /// Fetches and resolves a single record.
    pub async fn get(&self, id: Uuid) -> VaultResult<RecordView> {
        let record = self.store.get_record(&self.owner_id, self.kind, id).await?;
        Ok(self.resolve(record))
    }

    /// Encrypts `payload` and stores it as a new record.
    pub async fn create<T: Serialize + ?Sized>(&self, payload: &T) -> VaultResult<RecordView> {
        let key = self.require_key()?;
        let value = serde_json::to_value(payload)?;
        let sealed = encrypt_record(&value, key)?;
        let record = self
            .store
            .insert_record(&self.owner_id, self.kind, &sealed)
            .await?;
        Ok(RecordView {
            content: RecordContent::Decrypted(merge_legacy(value, &record.legacy)),
            record,
        })
    }

    /// Replaces record `id` with a freshly encrypted copy of `payload`.
    ///
    /// `payload` must be the complete record; sealed content is never
    /// patched in place.
    pub async fn update<T: Serialize + ?Sized>(
        &self,
        id: Uuid,
        payload: &T,
    ) -> VaultResult<RecordView> {
        let key = self.require_key()?;
        let value = serde_json::to_value(payload)?;
        let sealed = encrypt_record(&value, key)?;
        let record = self
            .store
            .replace_sealed(&self.owner_id, self.kind, id, &sealed)
            .await?;
        Ok(RecordView {
            content: RecordContent::Decrypted(merge_legacy(value, &record.legacy)),
            record,
        })
    }

    /// Applies new ordering indices. Metadata only, allowed while degraded.
    pub async fn reorder(&self, orders: &[(Uuid, i64)]) -> VaultResult<usize> {
        Ok(self.store.reorder(&self.owner_id, self.kind, orders).await?)
    }

    /// Deletes the listed records of this session's user and kind.
    pub async fn delete(&self, ids: &[Uuid]) -> VaultResult<usize> {
        Ok(self.store.delete_records(&self.owner_id, self.kind, ids).await?)
    }

    fn require_key(&self) -> VaultResult<&MasterKey> {
        match &self.key {
            KeyMaterial::Unwrapped(key) => Ok(key),
            KeyMaterial::Unavailable { reason } => Err(VaultError::KeyUnavailable(reason.clone())),
        }
    }

    fn resolve(&self, record: StoredRecord) -> RecordView {
        let content = match (&self.key, &record.sealed) {
            (KeyMaterial::Unwrapped(key), Some(sealed)) => match sealed.open::<Value>(key) {
                Ok(value) => RecordContent::Decrypted(merge_legacy(value, &record.legacy)),
                Err(e) => {
                    warn!("record {} of user {} not decryptable: {e}", record.id, self.owner_id);
                    fallback(&record.legacy)
                }
            },
            _ => fallback(&record.legacy),
        };
        RecordView { record, content }
    }
}

/// Derives the wrapping key and opens `wrapped` on the blocking pool.
///
/// The outer result carries task failures, the inner one key-level errors,
/// including an empty session identifier.
async fn unwrap_for_session(
    wrapped: WrappedMasterKey,
    session_id: &str,
) -> VaultResult<CryptoResult<MasterKey>> {
    let session = match SessionId::new(session_id) {
        Ok(session) => session,
        Err(e) => return Ok(Err(e)),
    };
    Ok(tokio::task::spawn_blocking(move || unwrap_master_key(&wrapped, &session)).await?)
}

/// Fills fields missing from a decrypted object with legacy values.
fn merge_legacy(value: Value, legacy: &Map<String, Value>) -> Value {
    match value {
        Value::Object(mut fields) => {
            for (name, legacy_value) in legacy {
                fields
                    .entry(name.clone())
                    .or_insert_with(|| legacy_value.clone());
            }
            Value::Object(fields)
        }
        other => other,
    }
}

fn fallback(legacy: &Map<String, Value>) -> RecordContent {
    if legacy.is_empty() {
        RecordContent::Unreadable
    } else {
        RecordContent::Fallback(Value::Object(legacy.clone()))
    }
}
