//! Tenant key model

use crate::crypto::Algorithm;
use chrono::{DateTime, Utc};
use lexguard_common::{KeyId, SecurityError, SecurityResult, TenantId};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Key length for AES-256-GCM
pub const KEY_LEN: usize = 32;

/// Tenant key metadata (never carries key material)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantKey {
    pub tenant_id: TenantId,
    pub key_id: KeyId,
    pub is_active: bool,
    pub algorithm: Algorithm,
    pub created_at: DateTime<Utc>,
    /// Set when a rotation replaced this key
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl TenantKey {
    /// Age of the key at `now`
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

/// Symmetric key material
///
/// Cloning shares the same allocation. `Debug` never prints the bytes.
#[derive(Clone)]
pub struct KeyMaterial(Arc<[u8; KEY_LEN]>);

impl KeyMaterial {
    pub(crate) fn generate(rng: &SystemRandom) -> SecurityResult<Self> {
        let mut bytes = [0u8; KEY_LEN];
        rng.fill(&mut bytes)
            .map_err(|_| SecurityError::Storage {
                message: "system random generator unavailable".into(),
                transient: false,
            })?;
        Ok(Self(Arc::new(bytes)))
    }

    /// Rebuild material loaded by a [`KeyStore`](super::KeyStore) implementation.
    pub fn from_bytes(bytes: &[u8]) -> SecurityResult<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            SecurityError::InvalidInput(format!(
                "key material must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(Arc::new(bytes)))
    }

    /// Raw bytes for persistence by a [`KeyStore`](super::KeyStore)
    /// implementation. Wrap with a KMS before writing to disk.
    pub fn to_storage_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Key record as held by a key store
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub meta: TenantKey,
    pub material: KeyMaterial,
}

impl StoredKey {
    pub(crate) fn generate(tenant_id: &TenantId, rng: &SystemRandom) -> SecurityResult<Self> {
        Ok(Self {
            meta: TenantKey {
                tenant_id: tenant_id.clone(),
                key_id: KeyId::generate(),
                is_active: true,
                algorithm: Algorithm::Aes256Gcm,
                created_at: Utc::now(),
                deactivated_at: None,
            },
            material: KeyMaterial::generate(rng)?,
        })
    }
}
