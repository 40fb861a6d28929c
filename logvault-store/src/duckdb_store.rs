//! DuckDB-backed key and record store.
//!
//! `user_keys.user_id` is the primary key, so first-time key creation is a
//! single `INSERT .. ON CONFLICT DO NOTHING` followed by a read of the row
//! that won. DuckDB calls are synchronous and run on the blocking pool.

use crate::error::{StorageError, StorageResult};
use crate::model::{RecordKind, StoredRecord, sealed_from_columns, validate_sealed};
use crate::{KeyStore, RecordStore, now_millis};
use async_trait::async_trait;
use duckdb::{Connection, params};
use logvault_crypto::{EncryptedRecord, KdfDescriptor, KdfSalt, Salt, WrappedMasterKey};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

const RECORD_COLUMNS: &str =
    "id, owner_id, kind, sort_order, ciphertext, nonce, legacy_json, created_at, updated_at";

/// Key and record store backed by a single DuckDB connection.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

type RawRecordRow = (
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

impl DuckDbStore {
    /// Opens or creates a store at `path`.
    ///
    /// If the open fails while a `.wal` file sits next to the database, the
    /// WAL is discarded and the open retried once.
    pub fn open(path: &Path, memory_limit: &str, threads: u32) -> StorageResult<Self> {
        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(open_err) => {
                let wal = wal_path(path);
                if !wal.exists() {
                    return Err(open_err.into());
                }
                warn!("DuckDB open failed ({open_err}), discarding WAL {}", wal.display());
                if std::fs::remove_file(&wal).is_err() {
                    return Err(open_err.into());
                }
                Connection::open(path)?
            }
        };
        conn.execute_batch(&format!(
            "PRAGMA memory_limit='{memory_limit}'; PRAGMA threads={threads};"
        ))?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

/// `vault.duckdb` -> `vault.duckdb.wal`.
fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".wal");
    PathBuf::from(name)
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS user_keys (
            user_id VARCHAR PRIMARY KEY,
            wrapped_key VARCHAR NOT NULL,
            kdf_salt VARCHAR,
            kdf_iterations BIGINT NOT NULL,
            created_at BIGINT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS records (
            id VARCHAR PRIMARY KEY,
            owner_id VARCHAR NOT NULL,
            kind VARCHAR NOT NULL,
            sort_order BIGINT NOT NULL,
            ciphertext VARCHAR,
            nonce VARCHAR,
            legacy_json VARCHAR,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_owner_kind ON records(owner_id, kind);
        "#,
    )?;
    Ok(())
}

fn read_raw_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawRecordRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn record_from_raw(raw: RawRecordRow) -> StorageResult<StoredRecord> {
    let (id, owner_id, kind, order, ciphertext, nonce, legacy_json, created_at, updated_at) = raw;
    let id = Uuid::parse_str(&id)
        .map_err(|e| StorageError::Corrupt(format!("record id {id:?}: {e}")))?;
    let legacy = match legacy_json {
        Some(json) if !json.is_empty() => serde_json::from_str(&json)?,
        _ => Map::new(),
    };
    Ok(StoredRecord {
        id,
        owner_id,
        kind: kind.parse()?,
        order,
        sealed: sealed_from_columns(ciphertext, nonce),
        legacy,
        created_at,
        updated_at,
    })
}

fn fetch_record(
    conn: &Connection,
    owner_id: &str,
    kind: RecordKind,
    id: Uuid,
) -> StorageResult<StoredRecord> {
    let result = conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ? AND owner_id = ? AND kind = ?"),
        params![id.to_string(), owner_id, kind.as_str()],
        read_raw_row,
    );
    match result {
        Ok(raw) => record_from_raw(raw),
        Err(duckdb::Error::QueryReturnedNoRows) => {
            Err(StorageError::NotFound(format!("{kind} {id}")))
        }
        Err(e) => Err(e.into()),
    }
}

fn push_record(
    conn: &mut Connection,
    owner_id: &str,
    kind: RecordKind,
    sealed: Option<&EncryptedRecord>,
    legacy: &Map<String, Value>,
) -> StorageResult<StoredRecord> {
    let legacy_json = if legacy.is_empty() {
        None
    } else {
        Some(serde_json::to_string(legacy)?)
    };
    let id = Uuid::now_v7();
    let now = now_millis();

    let tx = conn.transaction()?;
    let next_order: i64 = tx.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM records WHERE owner_id = ? AND kind = ?",
        params![owner_id, kind.as_str()],
        |row| row.get(0),
    )?;
    tx.execute(
        r#"
        INSERT INTO records (
            id, owner_id, kind, sort_order, ciphertext, nonce,
            legacy_json, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            id.to_string(),
            owner_id,
            kind.as_str(),
            next_order,
            sealed.map(|s| s.ciphertext.as_str()),
            sealed.map(|s| s.nonce.as_str()),
            legacy_json,
            now,
            now,
        ],
    )?;
    let record = fetch_record(&tx, owner_id, kind, id)?;
    tx.commit()?;
    Ok(record)
}

fn wrapped_key_from_columns(
    blob: String,
    salt: Option<String>,
    iterations: i64,
) -> StorageResult<WrappedMasterKey> {
    let salt = match salt {
        Some(encoded) => KdfSalt::PerUser(
            Salt::from_base64(&encoded).map_err(|e| StorageError::Corrupt(e.to_string()))?,
        ),
        None => KdfSalt::Legacy,
    };
    let iterations = u32::try_from(iterations)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| StorageError::Corrupt(format!("kdf iteration count {iterations}")))?;
    Ok(WrappedMasterKey {
        blob,
        kdf: KdfDescriptor { salt, iterations },
    })
}

fn salt_column(kdf: &KdfDescriptor) -> Option<String> {
    match kdf.salt {
        KdfSalt::Legacy => None,
        KdfSalt::PerUser(salt) => Some(salt.to_base64()),
    }
}

fn select_wrapped_key(conn: &Connection, user_id: &str) -> StorageResult<Option<WrappedMasterKey>> {
    let result = conn.query_row(
        "SELECT wrapped_key, kdf_salt, kdf_iterations FROM user_keys WHERE user_id = ?",
        params![user_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    );
    match result {
        Ok((blob, salt, iterations)) => wrapped_key_from_columns(blob, salt, iterations).map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KeyStore for DuckDbStore {
    async fn get_wrapped_key(&self, user_id: &str) -> StorageResult<Option<WrappedMasterKey>> {
        let user_id = user_id.to_string();
        self.run(move |conn| select_wrapped_key(conn, &user_id)).await
    }

    async fn insert_wrapped_key_if_absent(
        &self,
        user_id: &str,
        key: &WrappedMasterKey,
    ) -> StorageResult<WrappedMasterKey> {
        let user_id = user_id.to_string();
        let key = key.clone();
        self.run(move |conn| {
            let inserted = conn.execute(
                r#"
                INSERT INTO user_keys (user_id, wrapped_key, kdf_salt, kdf_iterations, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (user_id) DO NOTHING
                "#,
                params![
                    user_id,
                    key.blob,
                    salt_column(&key.kdf),
                    i64::from(key.kdf.iterations),
                    now_millis(),
                ],
            )?;
            if inserted == 0 {
                debug!("wrapped key already present for user {user_id}, keeping existing");
            }
            select_wrapped_key(conn, &user_id)?.ok_or_else(|| {
                StorageError::NotFound(format!("wrapped key for user {user_id} after insert"))
            })
        })
        .await
    }
}

#[async_trait]
impl RecordStore for DuckDbStore {
    async fn list_records(&self, owner_id: &str, kind: RecordKind) -> StorageResult<Vec<StoredRecord>> {
        let order_by = if kind.newest_first() {
            "created_at DESC, id DESC"
        } else {
            "sort_order ASC, id ASC"
        };
        let owner_id = owner_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE owner_id = ? AND kind = ? ORDER BY {order_by}"
            ))?;
            let rows: Vec<RawRecordRow> = stmt
                .query_map(params![owner_id, kind.as_str()], read_raw_row)?
                .collect::<Result<_, _>>()?;
            rows.into_iter().map(record_from_raw).collect()
        })
        .await
    }

    async fn get_record(&self, owner_id: &str, kind: RecordKind, id: Uuid) -> StorageResult<StoredRecord> {
        let owner_id = owner_id.to_string();
        self.run(move |conn| fetch_record(conn, &owner_id, kind, id))
            .await
    }

    async fn insert_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        sealed: &EncryptedRecord,
    ) -> StorageResult<StoredRecord> {
        validate_sealed(sealed)?;
        let owner_id = owner_id.to_string();
        let sealed = sealed.clone();
        self.run(move |conn| push_record(conn, &owner_id, kind, Some(&sealed), &Map::new()))
            .await
    }

    async fn import_legacy_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        legacy: Map<String, Value>,
    ) -> StorageResult<StoredRecord> {
        let owner_id = owner_id.to_string();
        self.run(move |conn| push_record(conn, &owner_id, kind, None, &legacy))
            .await
    }

    async fn replace_sealed(
        &self,
        owner_id: &str,
        kind: RecordKind,
        id: Uuid,
        sealed: &EncryptedRecord,
    ) -> StorageResult<StoredRecord> {
        validate_sealed(sealed)?;
        let owner_id = owner_id.to_string();
        let sealed = sealed.clone();
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE records SET ciphertext = ?, nonce = ?, updated_at = ? \
                 WHERE id = ? AND owner_id = ? AND kind = ?",
                params![
                    sealed.ciphertext,
                    sealed.nonce,
                    now_millis(),
                    id.to_string(),
                    owner_id,
                    kind.as_str(),
                ],
            )?;
            if updated == 0 {
                return Err(StorageError::NotFound(format!("{kind} {id}")));
            }
            fetch_record(conn, &owner_id, kind, id)
        })
        .await
    }

    async fn reorder(
        &self,
        owner_id: &str,
        kind: RecordKind,
        orders: &[(Uuid, i64)],
    ) -> StorageResult<usize> {
        let owner_id = owner_id.to_string();
        let orders = orders.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            for (id, order) in &orders {
                let updated = tx.execute(
                    "UPDATE records SET sort_order = ?, updated_at = ? \
                     WHERE id = ? AND owner_id = ? AND kind = ?",
                    params![*order, now, id.to_string(), owner_id, kind.as_str()],
                )?;
                if updated == 0 {
                    // Dropping the transaction rolls back earlier updates.
                    return Err(StorageError::NotFound(format!("{kind} {id}")));
                }
            }
            tx.commit()?;
            Ok(orders.len())
        })
        .await
    }

    async fn delete_records(&self, owner_id: &str, kind: RecordKind, ids: &[Uuid]) -> StorageResult<usize> {
        let owner_id = owner_id.to_string();
        let mut ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        ids.sort_unstable();
        ids.dedup();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for id in &ids {
                deleted += tx.execute(
                    "DELETE FROM records WHERE id = ? AND owner_id = ? AND kind = ?",
                    params![id, owner_id, kind.as_str()],
                )?;
            }
            if deleted == 0 {
                return Err(StorageError::NotFound("no matching records".to_string()));
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }
}
