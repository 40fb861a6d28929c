//! Key and record storage for LogVault.
//!
//! The stores only ever see wrapped keys and sealed records. Two backends
//! implement the traits:
//!
//! - [`MemoryStore`]: process-local maps, for tests and ephemeral sessions
//! - [`DuckDbStore`]: DuckDB tables with a uniqueness constraint per user key
//!
//! First-time key creation goes through [`KeyStore::insert_wrapped_key_if_absent`],
//! which is atomic at the store. Callers never do read-then-write.

mod duckdb_store;
mod error;
mod memory;
pub mod model;

pub use duckdb_store::DuckDbStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use model::{
    GoalPayload, JournalPayload, PLACEHOLDER_CIPHERTEXT, RecordKind, StoredRecord,
};

use async_trait::async_trait;
use logvault_crypto::{EncryptedRecord, WrappedMasterKey};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Persists exactly one wrapped master key per user.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_wrapped_key(&self, user_id: &str) -> StorageResult<Option<WrappedMasterKey>>;

    /// Stores `key` unless the user already has one.
    ///
    /// Returns whichever key is stored once the call completes. When two
    /// callers race, both get the winner's key back.
    async fn insert_wrapped_key_if_absent(
        &self,
        user_id: &str,
        key: &WrappedMasterKey,
    ) -> StorageResult<WrappedMasterKey>;
}

/// Row store for sealed user records.
///
/// Every write is all-or-nothing: a `{ciphertext, nonce}` pair either lands
/// whole or not at all.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Lists an owner's records of one kind. Goals come back by ascending
    /// order index, journal entries newest first.
    async fn list_records(&self, owner_id: &str, kind: RecordKind) -> StorageResult<Vec<StoredRecord>>;

    /// Fetches one record. Records owned by someone else or of another
    /// kind are `NotFound`.
    async fn get_record(&self, owner_id: &str, kind: RecordKind, id: Uuid) -> StorageResult<StoredRecord>;

    /// Inserts a sealed record at the end of the owner's ordering.
    async fn insert_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        sealed: &EncryptedRecord,
    ) -> StorageResult<StoredRecord>;

    /// Inserts a pre-encryption row carrying plaintext columns only.
    async fn import_legacy_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        legacy: Map<String, Value>,
    ) -> StorageResult<StoredRecord>;

    /// Replaces a record's sealed pair in its entirety. The record must
    /// belong to `owner_id` and be of `kind`.
    async fn replace_sealed(
        &self,
        owner_id: &str,
        kind: RecordKind,
        id: Uuid,
        sealed: &EncryptedRecord,
    ) -> StorageResult<StoredRecord>;

    /// Applies new order indices in one transaction. Any id that is not an
    /// `owner_id` record of `kind` aborts the whole batch.
    async fn reorder(
        &self,
        owner_id: &str,
        kind: RecordKind,
        orders: &[(Uuid, i64)],
    ) -> StorageResult<usize>;

    /// Deletes the listed `owner_id` records of `kind`, ignoring the rest.
    /// Returns how many were removed; zero matches is `NotFound`.
    async fn delete_records(&self, owner_id: &str, kind: RecordKind, ids: &[Uuid]) -> StorageResult<usize>;
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
