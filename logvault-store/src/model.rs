//! Record rows and typed payloads.
//!
//! Only the `{ciphertext, nonce}` pair is sensitive. Owner, ordering index
//! and timestamps are stored in clear so listing and reordering never need
//! the master key.

use crate::error::{StorageError, StorageResult};
use logvault_crypto::EncryptedRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ciphertext value written by old clients for rows saved without a key.
pub const PLACEHOLDER_CIPHERTEXT: &str = "placeholder";

/// Which user-authored collection a record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Goal,
    JournalEntry,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Goal => "goal",
            RecordKind::JournalEntry => "journal_entry",
        }
    }

    /// Goals follow the user's manual ordering; journal entries list newest first.
    pub fn newest_first(&self) -> bool {
        matches!(self, RecordKind::JournalEntry)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "goal" => Ok(RecordKind::Goal),
            "journal_entry" => Ok(RecordKind::JournalEntry),
            other => Err(StorageError::Corrupt(format!("unknown record kind {other:?}"))),
        }
    }
}

/// A persisted record row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub kind: RecordKind,
    /// Ordering index. Meaningful for goals; insertion order for entries.
    pub order: i64,
    /// `None` for rows written before encryption was introduced.
    pub sealed: Option<EncryptedRecord>,
    /// Plaintext columns kept from before encryption, keyed by payload
    /// field name. Display fallback only.
    pub legacy: Map<String, Value>,
    /// Unix millis.
    pub created_at: i64,
    /// Unix millis.
    pub updated_at: i64,
}

/// Builds the sealed pair from raw columns, treating empty values and the
/// placeholder sentinel as "never encrypted".
pub fn sealed_from_columns(ciphertext: Option<String>, nonce: Option<String>) -> Option<EncryptedRecord> {
    match (ciphertext, nonce) {
        (Some(ciphertext), Some(nonce))
            if !ciphertext.is_empty() && ciphertext != PLACEHOLDER_CIPHERTEXT && !nonce.is_empty() =>
        {
            Some(EncryptedRecord { ciphertext, nonce })
        }
        _ => None,
    }
}

/// Rejects pairs that would leave a half-written or unreadable row.
pub fn validate_sealed(sealed: &EncryptedRecord) -> StorageResult<()> {
    if sealed.ciphertext.is_empty() || sealed.ciphertext == PLACEHOLDER_CIPHERTEXT {
        return Err(StorageError::InvalidRecord("missing ciphertext".to_string()));
    }
    if sealed.nonce.is_empty() {
        return Err(StorageError::InvalidRecord("missing nonce".to_string()));
    }
    Ok(())
}

/// Goal payload as sealed by clients.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalPayload {
    pub text: String,
    #[serde(default)]
    pub is_completed: bool,
}

/// Journal entry payload as sealed by clients.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalPayload {
    #[serde(default)]
    pub attention_focus: String,
    #[serde(default)]
    pub thoughts: String,
    #[serde(default)]
    pub body_sensations: String,
    #[serde(default)]
    pub actions: String,
    #[serde(default)]
    pub how_to_act: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
}
