//! In-memory key and record store.

use crate::error::{StorageError, StorageResult};
use crate::model::{RecordKind, StoredRecord, validate_sealed};
use crate::{KeyStore, RecordStore, now_millis};
use async_trait::async_trait;
use logvault_crypto::{EncryptedRecord, WrappedMasterKey};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Thread-safe in-memory store implementing both store traits.
#[derive(Clone, Default)]
pub struct MemoryStore {
    keys: Arc<RwLock<HashMap<String, WrappedMasterKey>>>,
    records: Arc<RwLock<HashMap<Uuid, StoredRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a stored key.
    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    async fn push_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        sealed: Option<EncryptedRecord>,
        legacy: Map<String, Value>,
    ) -> StoredRecord {
        let mut records = self.records.write().await;
        let order = records
            .values()
            .filter(|r| is_scoped(r, owner_id, kind))
            .map(|r| r.order)
            .max()
            .map_or(0, |max| max + 1);
        let now = now_millis();
        let record = StoredRecord {
            id: Uuid::now_v7(),
            owner_id: owner_id.to_string(),
            kind,
            order,
            sealed,
            legacy,
            created_at: now,
            updated_at: now,
        };
        records.insert(record.id, record.clone());
        record
    }
}

fn not_found(id: Uuid) -> StorageError {
    StorageError::NotFound(format!("record {id}"))
}

fn is_scoped(record: &StoredRecord, owner_id: &str, kind: RecordKind) -> bool {
    record.owner_id == owner_id && record.kind == kind
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get_wrapped_key(&self, user_id: &str) -> StorageResult<Option<WrappedMasterKey>> {
        Ok(self.keys.read().await.get(user_id).cloned())
    }

    async fn insert_wrapped_key_if_absent(
        &self,
        user_id: &str,
        key: &WrappedMasterKey,
    ) -> StorageResult<WrappedMasterKey> {
        let mut keys = self.keys.write().await;
        let stored = match keys.entry(user_id.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => slot.insert(key.clone()).clone(),
        };
        Ok(stored)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_records(&self, owner_id: &str, kind: RecordKind) -> StorageResult<Vec<StoredRecord>> {
        let mut out: Vec<StoredRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| is_scoped(r, owner_id, kind))
            .cloned()
            .collect();
        if kind.newest_first() {
            out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        } else {
            out.sort_by(|a, b| a.order.cmp(&b.order).then(a.id.cmp(&b.id)));
        }
        Ok(out)
    }

    async fn get_record(&self, owner_id: &str, kind: RecordKind, id: Uuid) -> StorageResult<StoredRecord> {
        self.records
            .read()
            .await
            .get(&id)
            .filter(|r| is_scoped(r, owner_id, kind))
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn insert_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        sealed: &EncryptedRecord,
    ) -> StorageResult<StoredRecord> {
        validate_sealed(sealed)?;
        Ok(self
            .push_record(owner_id, kind, Some(sealed.clone()), Map::new())
            .await)
    }

    async fn import_legacy_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        legacy: Map<String, Value>,
    ) -> StorageResult<StoredRecord> {
        Ok(self.push_record(owner_id, kind, None, legacy).await)
    }

    async fn replace_sealed(
        &self,
        owner_id: &str,
        kind: RecordKind,
        id: Uuid,
        sealed: &EncryptedRecord,
    ) -> StorageResult<StoredRecord> {
        validate_sealed(sealed)?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .filter(|r| is_scoped(r, owner_id, kind))
            .ok_or_else(|| not_found(id))?;
        record.sealed = Some(sealed.clone());
        record.updated_at = now_millis();
        Ok(record.clone())
    }

    async fn reorder(
        &self,
        owner_id: &str,
        kind: RecordKind,
        orders: &[(Uuid, i64)],
    ) -> StorageResult<usize> {
        let mut records = self.records.write().await;
        if let Some((id, _)) = orders
            .iter()
            .find(|(id, _)| !records.get(id).is_some_and(|r| is_scoped(r, owner_id, kind)))
        {
            return Err(not_found(*id));
        }
        let now = now_millis();
        for (id, order) in orders {
            if let Some(record) = records.get_mut(id) {
                record.order = *order;
                record.updated_at = now;
            }
        }
        Ok(orders.len())
    }

    async fn delete_records(
        &self,
        owner_id: &str,
        kind: RecordKind,
        ids: &[Uuid],
    ) -> StorageResult<usize> {
        let mut records = self.records.write().await;
        let mut owned: Vec<Uuid> = ids
            .iter()
            .filter(|id| records.get(*id).is_some_and(|r| is_scoped(r, owner_id, kind)))
            .copied()
            .collect();
        owned.sort_unstable();
        owned.dedup();
        if owned.is_empty() {
            return Err(StorageError::NotFound("no matching records".to_string()));
        }
        for id in &owned {
            records.remove(id);
        }
        Ok(owned.len())
    }
}
