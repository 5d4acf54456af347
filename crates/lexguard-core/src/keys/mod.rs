//! Key Vault
//!
//! Owns per-tenant key material and its lifecycle. Mutations for one tenant
//! are serialized behind that tenant's lock; tenants never share a lock.

pub mod model;
pub mod store;

pub use model::{KeyMaterial, StoredKey, TenantKey, KEY_LEN};
pub use store::{InMemoryKeyStore, KeyStore};

use crate::store::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lexguard_common::{KeyId, KeyPolicyConfig, SecurityError, SecurityResult, TenantId};
use ring::rand::SystemRandom;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Answers how much stored ciphertext still points at a key.
///
/// Implemented by the services that own encrypted records; the vault only
/// retires keys reported as unreferenced.
#[async_trait]
pub trait KeyReferenceCatalog: Send + Sync {
    async fn reference_count(&self, tenant_id: &TenantId, key_id: &KeyId) -> StoreResult<u64>;
}

/// Key vault
pub struct KeyVault {
    store: Arc<dyn KeyStore>,
    policy: KeyPolicyConfig,
    rng: SystemRandom,
    tenant_locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl KeyVault {
    pub fn new(store: Arc<dyn KeyStore>, policy: KeyPolicyConfig) -> Self {
        Self {
            store,
            policy,
            rng: SystemRandom::new(),
            tenant_locks: DashMap::new(),
        }
    }

    /// Generate a new active key for the tenant.
    ///
    /// A tenant that already has an active key keeps it as history; the new
    /// key replaces it as the active one.
    pub async fn generate_tenant_key(&self, tenant_id: &TenantId) -> SecurityResult<TenantKey> {
        let (key, previous) = self.install_new_key(tenant_id).await?;
        match previous {
            Some(previous) => tracing::warn!(
                tenant_id = %tenant_id,
                key_id = %key.key_id,
                replaced = %previous,
                "Generated key replaced an existing active key"
            ),
            None => tracing::info!(tenant_id = %tenant_id, key_id = %key.key_id, "Generated tenant key"),
        }
        Ok(key)
    }

    /// Rotate the tenant key; the previous key stays resolvable.
    pub async fn rotate_tenant_key(&self, tenant_id: &TenantId) -> SecurityResult<TenantKey> {
        let (key, previous) = self.install_new_key(tenant_id).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            key_id = %key.key_id,
            previous = previous.as_ref().map(|k| k.as_str()).unwrap_or("none"),
            "Rotated tenant key"
        );
        Ok(key)
    }

    async fn install_new_key(&self, tenant_id: &TenantId) -> SecurityResult<(TenantKey, Option<KeyId>)> {
        if tenant_id.is_empty() {
            return Err(SecurityError::InvalidContext("empty tenant id".into()));
        }

        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let key = StoredKey::generate(tenant_id, &self.rng)?;
        let meta = key.meta.clone();
        let previous = self
            .with_retry("install_active_key", || self.store.install_active_key(key.clone()))
            .await?;
        Ok((meta, previous))
    }

    /// True when the active key is older than the rotation interval, or when
    /// the tenant has no active key at all.
    pub async fn is_key_rotation_needed(&self, tenant_id: &TenantId) -> SecurityResult<bool> {
        self.is_key_rotation_needed_at(tenant_id, Utc::now()).await
    }

    pub async fn is_key_rotation_needed_at(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> SecurityResult<bool> {
        Ok(match self.active_key(tenant_id).await? {
            Some(key) => key.age_secs(now) > self.policy.rotation_interval_secs(),
            None => true,
        })
    }

    /// Resolve key material for `key_id` on behalf of `tenant_id`.
    ///
    /// Fails with `KeyNotFound` when the key is unknown or belongs to any
    /// other tenant.
    pub async fn resolve_key(&self, tenant_id: &TenantId, key_id: &KeyId) -> SecurityResult<KeyMaterial> {
        let not_found = || SecurityError::KeyNotFound {
            tenant_id: tenant_id.to_string(),
            key_id: key_id.to_string(),
        };
        if tenant_id.is_empty() {
            return Err(not_found());
        }

        let stored = self
            .with_retry("get_key", || self.store.get(tenant_id, key_id))
            .await?;
        match stored {
            Some(key) if &key.meta.tenant_id == tenant_id && &key.meta.key_id == key_id => Ok(key.material),
            Some(_) => {
                tracing::error!(tenant_id = %tenant_id, key_id = %key_id, "Key store returned a foreign key record");
                Err(not_found())
            }
            None => {
                tracing::debug!(tenant_id = %tenant_id, key_id = %key_id, "Key resolution failed");
                Err(not_found())
            }
        }
    }

    /// Active key metadata
    pub async fn active_key(&self, tenant_id: &TenantId) -> SecurityResult<Option<TenantKey>> {
        Ok(self
            .with_retry("active_key", || self.store.active(tenant_id))
            .await?
            .map(|k| k.meta))
    }

    pub(crate) async fn active_key_material(
        &self,
        tenant_id: &TenantId,
    ) -> SecurityResult<(TenantKey, KeyMaterial)> {
        let key = self
            .with_retry("active_key", || self.store.active(tenant_id))
            .await?;
        match key {
            Some(key) if key.meta.is_active && &key.meta.tenant_id == tenant_id => Ok((key.meta, key.material)),
            _ => Err(SecurityError::EncryptionKeyNotFound {
                tenant_id: tenant_id.to_string(),
            }),
        }
    }

    /// Key history, metadata only
    pub async fn list_tenant_keys(&self, tenant_id: &TenantId) -> SecurityResult<Vec<TenantKey>> {
        self.with_retry("list_keys", || self.store.list(tenant_id)).await
    }

    /// Owner of a key id, if the key exists
    pub async fn key_owner(&self, key_id: &KeyId) -> SecurityResult<Option<TenantId>> {
        Ok(self.key_owners(key_id).await?.into_iter().next())
    }

    pub async fn key_owners(&self, key_id: &KeyId) -> SecurityResult<Vec<TenantId>> {
        self.with_retry("key_owners", || self.store.key_owners(key_id)).await
    }

    pub async fn known_tenants(&self) -> SecurityResult<Vec<TenantId>> {
        self.with_retry("tenants", || self.store.tenants()).await
    }

    /// Delete inactive keys that no stored ciphertext references any more.
    pub async fn retire_unreferenced_keys(
        &self,
        tenant_id: &TenantId,
        catalog: &dyn KeyReferenceCatalog,
    ) -> SecurityResult<Vec<KeyId>> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;

        let mut retired = Vec::new();
        for key in self.list_tenant_keys(tenant_id).await? {
            if key.is_active {
                continue;
            }
            let references = catalog.reference_count(tenant_id, &key.key_id).await?;
            if references > 0 {
                tracing::debug!(tenant_id = %tenant_id, key_id = %key.key_id, references, "Key still referenced");
                continue;
            }
            if self
                .with_retry("remove_key", || self.store.remove(tenant_id, &key.key_id))
                .await?
            {
                tracing::info!(tenant_id = %tenant_id, key_id = %key.key_id, "Retired unreferenced key");
                retired.push(key.key_id);
            }
        }
        Ok(retired)
    }

    /// Rotate every tenant whose active key is past the rotation interval.
    pub async fn rotate_due_keys(&self) -> Vec<TenantKey> {
        let tenants = match self.known_tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!(error = %e, "Unable to list tenants for key rotation");
                return Vec::new();
            }
        };

        let mut rotated = Vec::new();
        for tenant_id in tenants {
            match self.is_key_rotation_needed(&tenant_id).await {
                Ok(true) => match self.rotate_tenant_key(&tenant_id).await {
                    Ok(key) => rotated.push(key),
                    Err(e) => tracing::error!(tenant_id = %tenant_id, error = %e, "Scheduled rotation failed"),
                },
                Ok(false) => {}
                Err(e) => tracing::error!(tenant_id = %tenant_id, error = %e, "Rotation check failed"),
            }
        }
        rotated
    }

    fn tenant_lock(&self, tenant_id: &TenantId) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> SecurityResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.policy.store_retry_attempts => {
                    tracing::warn!(op, attempt, error = %e, "Transient key store failure, retrying");
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
