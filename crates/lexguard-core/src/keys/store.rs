//! Key store - persistence abstraction for tenant keys
//!
//! Logical layout: one row per `(tenant_id, key_id)` with an active flag.
//! A relational implementation keeps a unique index on `key_id` and performs
//! [`KeyStore::install_active_key`] in a single transaction.

use super::model::{StoredKey, TenantKey};
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use lexguard_common::{KeyId, TenantId};

/// Key store trait
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Key `key_id` if it belongs to `tenant_id`
    async fn get(&self, tenant_id: &TenantId, key_id: &KeyId) -> StoreResult<Option<StoredKey>>;

    /// Active key of the tenant
    async fn active(&self, tenant_id: &TenantId) -> StoreResult<Option<StoredKey>>;

    /// Key history of the tenant, oldest first
    async fn list(&self, tenant_id: &TenantId) -> StoreResult<Vec<TenantKey>>;

    /// Store `key` as the tenant's only active key, deactivating the previous
    /// one in the same step. Returns the id of the deactivated key.
    async fn install_active_key(&self, key: StoredKey) -> StoreResult<Option<KeyId>>;

    /// Every tenant holding a record with this key id
    async fn key_owners(&self, key_id: &KeyId) -> StoreResult<Vec<TenantId>>;

    /// Physically delete an inactive key
    async fn remove(&self, tenant_id: &TenantId, key_id: &KeyId) -> StoreResult<bool>;

    /// Tenants with at least one key
    async fn tenants(&self) -> StoreResult<Vec<TenantId>>;
}

/// In-memory key store, sharded per tenant
pub struct InMemoryKeyStore {
    keyrings: DashMap<TenantId, Vec<StoredKey>>,
    owners: DashMap<KeyId, TenantId>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self {
            keyrings: DashMap::new(),
            owners: DashMap::new(),
        }
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get(&self, tenant_id: &TenantId, key_id: &KeyId) -> StoreResult<Option<StoredKey>> {
        Ok(self.keyrings.get(tenant_id).and_then(|ring| {
            ring.iter()
                .find(|k| &k.meta.key_id == key_id)
                .cloned()
        }))
    }

    async fn active(&self, tenant_id: &TenantId) -> StoreResult<Option<StoredKey>> {
        Ok(self.keyrings.get(tenant_id).and_then(|ring| {
            ring.iter().find(|k| k.meta.is_active).cloned()
        }))
    }

    async fn list(&self, tenant_id: &TenantId) -> StoreResult<Vec<TenantKey>> {
        Ok(self.keyrings
            .get(tenant_id)
            .map(|ring| ring.iter().map(|k| k.meta.clone()).collect())
            .unwrap_or_default())
    }

    async fn install_active_key(&self, key: StoredKey) -> StoreResult<Option<KeyId>> {
        let tenant_id = key.meta.tenant_id.clone();
        let key_id = key.meta.key_id.clone();

        match self.owners.entry(key_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(owner) => {
                if owner.get() != &tenant_id {
                    return Err(StoreError::Conflict(format!(
                        "key {} already belongs to another tenant",
                        key_id
                    )));
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tenant_id.clone());
            }
        }

        // The entry guard holds the tenant shard for the whole swap.
        let mut ring = self.keyrings.entry(tenant_id).or_default();
        if ring.iter().any(|k| k.meta.key_id == key_id && k.meta.is_active) {
            return Ok(None);
        }

        let now = Utc::now();
        let mut previous = None;
        for existing in ring.iter_mut().filter(|k| k.meta.is_active) {
            existing.meta.is_active = false;
            existing.meta.deactivated_at = Some(now);
            previous = Some(existing.meta.key_id.clone());
        }

        let mut key = key;
        key.meta.is_active = true;
        ring.push(key);
        Ok(previous)
    }

    async fn key_owners(&self, key_id: &KeyId) -> StoreResult<Vec<TenantId>> {
        Ok(self.owners.get(key_id).map(|owner| owner.clone()).into_iter().collect())
    }

    async fn remove(&self, tenant_id: &TenantId, key_id: &KeyId) -> StoreResult<bool> {
        let removed = match self.keyrings.get_mut(tenant_id) {
            Some(mut ring) => {
                if ring.iter().any(|k| &k.meta.key_id == key_id && k.meta.is_active) {
                    return Err(StoreError::Conflict(format!("key {} is active", key_id)));
                }
                let before = ring.len();
                ring.retain(|k| &k.meta.key_id != key_id);
                ring.len() != before
            }
            None => false,
        };
        if removed {
            self.owners.remove(key_id);
        }
        Ok(removed)
    }

    async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
        let mut tenants: Vec<_> = self.keyrings.iter().map(|r| r.key().clone()).collect();
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    #[tokio::test]
    async fn test_install_keeps_single_active_key() {
        let store = InMemoryKeyStore::new();
        let rng = SystemRandom::new();
        let tenant = TenantId::new("t1");

        let first = StoredKey::generate(&tenant, &rng).unwrap();
        let first_id = first.meta.key_id.clone();
        assert_eq!(store.install_active_key(first).await.unwrap(), None);

        let second = StoredKey::generate(&tenant, &rng).unwrap();
        let second_id = second.meta.key_id.clone();
        assert_eq!(store.install_active_key(second).await.unwrap(), Some(first_id.clone()));

        let keys = store.list(&tenant).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);
        assert_eq!(store.active(&tenant).await.unwrap().unwrap().meta.key_id, second_id);

        // History stays resolvable
        assert!(store.get(&tenant, &first_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_is_scoped_to_tenant() {
        let store = InMemoryKeyStore::new();
        let rng = SystemRandom::new();
        let t1 = TenantId::new("t1");
        let t2 = TenantId::new("t2");

        let key = StoredKey::generate(&t1, &rng).unwrap();
        let key_id = key.meta.key_id.clone();
        store.install_active_key(key).await.unwrap();

        assert!(store.get(&t2, &key_id).await.unwrap().is_none());
        assert_eq!(store.key_owners(&key_id).await.unwrap(), vec![t1]);
    }

    #[tokio::test]
    async fn test_key_id_cannot_move_between_tenants() {
        let store = InMemoryKeyStore::new();
        let rng = SystemRandom::new();
        let key = StoredKey::generate(&TenantId::new("t1"), &rng).unwrap();

        let mut stolen = key.clone();
        stolen.meta.tenant_id = TenantId::new("t2");

        store.install_active_key(key).await.unwrap();
        assert!(matches!(
            store.install_active_key(stolen).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_refuses_active_key() {
        let store = InMemoryKeyStore::new();
        let rng = SystemRandom::new();
        let tenant = TenantId::new("t1");
        let key = StoredKey::generate(&tenant, &rng).unwrap();
        let key_id = key.meta.key_id.clone();
        store.install_active_key(key).await.unwrap();

        assert!(store.remove(&tenant, &key_id).await.is_err());
    }

    #[tokio::test]
    async fn test_owner_index_follows_removal() {
        let store = InMemoryKeyStore::new();
        let rng = SystemRandom::new();
        let tenant = TenantId::new("t1");

        let old = StoredKey::generate(&tenant, &rng).unwrap();
        let old_id = old.meta.key_id.clone();
        store.install_active_key(old).await.unwrap();
        store.install_active_key(StoredKey::generate(&tenant, &rng).unwrap()).await.unwrap();
        assert_eq!(store.key_owners(&old_id).await.unwrap(), vec![tenant.clone()]);

        assert!(store.remove(&tenant, &old_id).await.unwrap());
        assert!(store.key_owners(&old_id).await.unwrap().is_empty());
        assert!(store.key_owners(&KeyId::generate()).await.unwrap().is_empty());
    }
}
