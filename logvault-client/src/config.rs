//! Vault configuration.

use crate::error::{VaultError, VaultResult};
use logvault_crypto::KdfParams;
use logvault_store::DuckDbStore;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for key wrapping and the DuckDB-backed store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// PBKDF2 iteration count for newly wrapped keys.
    pub kdf_iterations: u32,

    /// DuckDB memory limit (e.g. "256MB").
    pub duckdb_memory_limit: String,

    /// DuckDB worker threads.
    pub duckdb_threads: u32,

    /// Default `tracing` filter used by [`crate::init_logging`] when
    /// `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: logvault_crypto::DEFAULT_KDF_ITERATIONS,
            duckdb_memory_limit: "256MB".to_string(),
            duckdb_threads: 2,
            log_filter: "info".to_string(),
        }
    }
}

impl VaultConfig {
    /// Parses a JSON document, filling missing fields with defaults, and
    /// validates the result.
    pub fn from_json(json: &str) -> VaultResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        self.kdf_params()?;
        if self.duckdb_memory_limit.trim().is_empty() {
            return Err(VaultError::Config("duckdb_memory_limit is empty".to_string()));
        }
        if !self
            .duckdb_memory_limit
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.')
        {
            return Err(VaultError::Config(format!(
                "duckdb_memory_limit {:?} is not a size",
                self.duckdb_memory_limit
            )));
        }
        if self.duckdb_threads == 0 {
            return Err(VaultError::Config("duckdb_threads must be at least 1".to_string()));
        }
        Ok(())
    }

    /// KDF parameters for newly wrapped keys.
    pub fn kdf_params(&self) -> VaultResult<KdfParams> {
        KdfParams::new(self.kdf_iterations).map_err(|e| VaultError::Config(e.to_string()))
    }

    /// Opens the DuckDB store at `path` with this config's resource limits.
    pub fn open_store(&self, path: &Path) -> VaultResult<DuckDbStore> {
        self.validate()?;
        Ok(DuckDbStore::open(
            path,
            &self.duckdb_memory_limit,
            self.duckdb_threads,
        )?)
    }
}
