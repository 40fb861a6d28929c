//! Server-side master key provisioning.

use crate::config::VaultConfig;
use crate::error::VaultResult;
use logvault_crypto::{KdfParams, MasterKey, SessionId, WrappedMasterKey, wrap_master_key};
use logvault_store::KeyStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Hands out each user's wrapped master key, creating it on first use.
pub struct MasterKeyProvider<K: ?Sized> {
    store: Arc<K>,
    params: KdfParams,
}

impl<K: ?Sized> Clone for MasterKeyProvider<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            params: self.params,
        }
    }
}

impl<K: KeyStore + ?Sized> MasterKeyProvider<K> {
    pub fn new(store: Arc<K>, params: KdfParams) -> Self {
        Self { store, params }
    }

    pub fn from_config(store: Arc<K>, config: &VaultConfig) -> VaultResult<Self> {
        Ok(Self::new(store, config.kdf_params()?))
    }

    /// Returns the user's wrapped master key, generating and persisting one
    /// if none exists yet.
    ///
    /// An existing key is returned unchanged. A new key is only returned
    /// after the store has accepted it; if another caller stored a key
    /// first, that key is returned instead and the local one is discarded.
    pub async fn get_or_create(
        &self,
        user_id: &str,
        session: &SessionId,
    ) -> VaultResult<WrappedMasterKey> {
        if let Some(existing) = self.store.get_wrapped_key(user_id).await? {
            debug!("master key already provisioned for user {user_id}");
            return Ok(existing);
        }

        let session = session.clone();
        let params = self.params;
        let candidate = tokio::task::spawn_blocking(move || {
            let key = MasterKey::generate()?;
            wrap_master_key(&key, &session, &params)
        })
        .await??;

        let stored = self
            .store
            .insert_wrapped_key_if_absent(user_id, &candidate)
            .await?;
        if stored == candidate {
            info!("provisioned new master key for user {user_id}");
        } else {
            info!("concurrent provisioning for user {user_id}, keeping the stored key");
        }
        Ok(stored)
    }
}
