//! Encryption Engine
//!
//! AES-256-GCM under the tenant's active key. The AAD binds every blob to
//! its tenant and key id, so a blob replayed under another tenant fails to
//! open even if the key were somehow resolvable.

pub mod blob;
pub mod file;
pub mod search;

pub use blob::{Algorithm, EncryptedBlob, NONCE_LEN, TAG_LEN};
pub use file::FileEncryptionSummary;

use crate::keys::{KeyMaterial, KeyVault};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blob::{TransitEnvelope, TRANSIT_VERSION};
use lexguard_common::{CryptoConfig, KeyId, SecurityError, SecurityResult, TenantId};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Encryption engine
pub struct EncryptionEngine {
    vault: Arc<KeyVault>,
    config: CryptoConfig,
    rng: SystemRandom,
}

impl EncryptionEngine {
    pub fn new(vault: Arc<KeyVault>, config: CryptoConfig) -> Self {
        Self {
            vault,
            config,
            rng: SystemRandom::new(),
        }
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    /// Encrypt under the tenant's active key
    pub async fn encrypt_data(&self, plaintext: &[u8], tenant_id: &TenantId) -> SecurityResult<EncryptedBlob> {
        if plaintext.is_empty() {
            return Err(SecurityError::InvalidInput("empty plaintext".into()));
        }

        let (meta, material) = self.vault.active_key_material(tenant_id).await?;
        let key = aead_key(&material)?;
        let iv = self.random_nonce()?;

        let mut in_out = plaintext.to_vec();
        let tag = key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(iv),
                Aad::from(blob_aad(tenant_id, &meta.key_id)),
                &mut in_out,
            )
            .map_err(|_| SecurityError::InvalidInput("plaintext too large".into()))?;

        tracing::debug!(tenant_id = %tenant_id, key_id = %meta.key_id, bytes = plaintext.len(), "Encrypted data");

        Ok(EncryptedBlob {
            data: in_out,
            iv: iv.to_vec(),
            tag: tag.as_ref().to_vec(),
            key_id: meta.key_id,
            algorithm: meta.algorithm,
        })
    }

    /// Decrypt a blob on behalf of `tenant_id`
    pub async fn decrypt_data(&self, blob: &EncryptedBlob, tenant_id: &TenantId) -> SecurityResult<Vec<u8>> {
        blob.validate()?;
        let material = self.resolve_for_decrypt(tenant_id, &blob.key_id).await?;
        let key = aead_key(&material)?;
        let nonce = Nonce::try_assume_unique_for_key(&blob.iv)
            .map_err(|_| SecurityError::InvalidInput("malformed nonce".into()))?;

        let mut in_out = Vec::with_capacity(blob.data.len() + TAG_LEN);
        in_out.extend_from_slice(&blob.data);
        in_out.extend_from_slice(&blob.tag);

        let len = key
            .open_in_place(nonce, Aad::from(blob_aad(tenant_id, &blob.key_id)), &mut in_out[..])
            .map_err(|_| {
                tracing::warn!(tenant_id = %tenant_id, key_id = %blob.key_id, "Authentication tag mismatch");
                SecurityError::IntegrityViolation("authentication tag mismatch".into())
            })?
            .len();
        in_out.truncate(len);
        Ok(in_out)
    }

    /// Serialize, encrypt and wrap as a base64 envelope
    pub async fn encrypt_transit_data<T: Serialize + ?Sized>(
        &self,
        value: &T,
        tenant_id: &TenantId,
    ) -> SecurityResult<String> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| SecurityError::InvalidInput(format!("unserializable value: {}", e)))?;
        let blob = self.encrypt_data(&plaintext, tenant_id).await?;
        let envelope = serde_json::to_vec(&TransitEnvelope { v: TRANSIT_VERSION, blob })
            .map_err(|e| SecurityError::InvalidInput(format!("envelope encoding: {}", e)))?;
        Ok(STANDARD.encode(envelope))
    }

    pub async fn decrypt_transit_data<T: DeserializeOwned>(
        &self,
        envelope: &str,
        tenant_id: &TenantId,
    ) -> SecurityResult<T> {
        let blob = decode_envelope(envelope)?;
        let plaintext = self.decrypt_data(&blob, tenant_id).await?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| SecurityError::InvalidInput(format!("decrypted payload: {}", e)))
    }

    /// Deterministic per-tenant blind index for `term`
    pub fn generate_searchable_hash(&self, term: &str, tenant_id: &TenantId) -> SecurityResult<String> {
        search::searchable_hash(self.config.search_pepper.as_bytes(), tenant_id, term)
    }

    /// True when the blob decrypts for the tenant. Never errors.
    pub async fn validate_data_integrity(&self, blob: &EncryptedBlob, tenant_id: &TenantId) -> bool {
        match self.decrypt_data(blob, tenant_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(tenant_id = %tenant_id, error = %e, "Integrity check failed");
                false
            }
        }
    }

    pub(crate) async fn resolve_for_decrypt(&self, tenant_id: &TenantId, key_id: &KeyId) -> SecurityResult<KeyMaterial> {
        self.vault.resolve_key(tenant_id, key_id).await.map_err(|e| match e {
            SecurityError::KeyNotFound { tenant_id, key_id } => {
                SecurityError::DecryptionKeyNotFound { tenant_id, key_id }
            }
            other => other,
        })
    }

    pub(crate) fn random_nonce(&self) -> SecurityResult<[u8; NONCE_LEN]> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce).map_err(|_| SecurityError::Storage {
            message: "system random generator unavailable".into(),
            transient: false,
        })?;
        Ok(nonce)
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.config.file_chunk_size
    }
}

/// Decode a transit envelope without decrypting it
pub fn decode_envelope(envelope: &str) -> SecurityResult<EncryptedBlob> {
    let raw = STANDARD
        .decode(envelope.trim().as_bytes())
        .map_err(|e| SecurityError::InvalidInput(format!("envelope is not base64: {}", e)))?;
    let envelope: TransitEnvelope = serde_json::from_slice(&raw)
        .map_err(|e| SecurityError::InvalidInput(format!("malformed envelope: {}", e)))?;
    if envelope.v != TRANSIT_VERSION {
        return Err(SecurityError::InvalidInput(format!("unsupported envelope version {}", envelope.v)));
    }
    Ok(envelope.blob)
}

pub(crate) fn aead_key(material: &KeyMaterial) -> SecurityResult<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, material.expose()).map_err(|_| SecurityError::Storage {
        message: "stored key material rejected by cipher".into(),
        transient: false,
    })?;
    Ok(LessSafeKey::new(unbound))
}

fn blob_aad(tenant_id: &TenantId, key_id: &KeyId) -> Vec<u8> {
    format!("lexguard:v1|{}|{}", tenant_id, key_id).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::InMemoryKeyStore;
    use lexguard_common::KeyPolicyConfig;
    use serde_json::json;

    async fn engine_with(tenants: &[&str]) -> EncryptionEngine {
        let vault = Arc::new(KeyVault::new(Arc::new(InMemoryKeyStore::new()), KeyPolicyConfig::default()));
        for t in tenants {
            vault.generate_tenant_key(&TenantId::new(*t)).await.unwrap();
        }
        EncryptionEngine::new(vault, CryptoConfig::default())
    }

    #[tokio::test]
    async fn test_round_trip() {
        let engine = engine_with(&["t1"]).await;
        let t1 = TenantId::new("t1");

        let blob = engine.encrypt_data(b"contrat confidentiel", &t1).await.unwrap();
        assert_eq!(blob.iv().len(), NONCE_LEN);
        assert_eq!(blob.tag().len(), TAG_LEN);
        assert_ne!(blob.data(), b"contrat confidentiel");

        let plain = engine.decrypt_data(&blob, &t1).await.unwrap();
        assert_eq!(plain, b"contrat confidentiel");
    }

    #[tokio::test]
    async fn test_nonces_are_fresh() {
        let engine = engine_with(&["t1"]).await;
        let t1 = TenantId::new("t1");
        let a = engine.encrypt_data(b"same", &t1).await.unwrap();
        let b = engine.encrypt_data(b"same", &t1).await.unwrap();
        assert_ne!(a.iv(), b.iv());
        assert_ne!(a.data(), b.data());
    }

    #[tokio::test]
    async fn test_other_tenant_cannot_decrypt() {
        let engine = engine_with(&["t1", "t2"]).await;
        let blob = engine.encrypt_data(b"secret", &TenantId::new("t1")).await.unwrap();

        let result = engine.decrypt_data(&blob, &TenantId::new("t2")).await;
        assert!(matches!(result, Err(SecurityError::DecryptionKeyNotFound { .. })));
    }

    #[tokio::test]
    async fn test_no_active_key() {
        let engine = engine_with(&[]).await;
        let result = engine.encrypt_data(b"x", &TenantId::new("t1")).await;
        assert!(matches!(result, Err(SecurityError::EncryptionKeyNotFound { .. })));
    }

    #[tokio::test]
    async fn test_empty_plaintext_rejected() {
        let engine = engine_with(&["t1"]).await;
        assert!(matches!(
            engine.encrypt_data(b"", &TenantId::new("t1")).await,
            Err(SecurityError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_tampering_detected() {
        let engine = engine_with(&["t1"]).await;
        let t1 = TenantId::new("t1");
        let mut blob = engine.encrypt_data(b"honoraires 1200 EUR", &t1).await.unwrap();
        blob.data[0] ^= 0x01;

        assert!(!engine.validate_data_integrity(&blob, &t1).await);
        assert!(matches!(
            engine.decrypt_data(&blob, &t1).await,
            Err(SecurityError::IntegrityViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_blobs_readable() {
        let engine = engine_with(&["t1"]).await;
        let t1 = TenantId::new("t1");
        let before = engine.encrypt_data(b"avant rotation", &t1).await.unwrap();

        let new_key = engine.vault().rotate_tenant_key(&t1).await.unwrap();
        let after = engine.encrypt_data(b"apres rotation", &t1).await.unwrap();

        assert_eq!(after.key_id(), &new_key.key_id);
        assert_ne!(before.key_id(), after.key_id());
        assert_eq!(engine.decrypt_data(&before, &t1).await.unwrap(), b"avant rotation");
        assert_eq!(engine.decrypt_data(&after, &t1).await.unwrap(), b"apres rotation");
    }

    #[tokio::test]
    async fn test_transit_round_trip() {
        let engine = engine_with(&["t1"]).await;
        let t1 = TenantId::new("t1");
        let value = json!({
            "dossier": "2024-118",
            "parties": ["Martin", "Durand"],
            "montant": 1250.5,
            "urgent": true,
            "notes": null
        });

        let envelope = engine.encrypt_transit_data(&value, &t1).await.unwrap();
        assert!(!envelope.contains("Martin"));

        let back: serde_json::Value = engine.decrypt_transit_data(&envelope, &t1).await.unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn test_malformed_envelope() {
        let engine = engine_with(&["t1"]).await;
        let t1 = TenantId::new("t1");

        let not_b64 = engine.decrypt_transit_data::<serde_json::Value>("%%%", &t1).await;
        assert!(matches!(not_b64, Err(SecurityError::InvalidInput(_))));

        let not_json = STANDARD.encode(b"hello");
        let result = engine.decrypt_transit_data::<serde_json::Value>(&not_json, &t1).await;
        assert!(matches!(result, Err(SecurityError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_search_hash_survives_rotation() {
        let engine = engine_with(&["t1"]).await;
        let t1 = TenantId::new("t1");
        let before = engine.generate_searchable_hash("Dupont", &t1).unwrap();
        engine.vault().rotate_tenant_key(&t1).await.unwrap();
        assert_eq!(engine.generate_searchable_hash("Dupont", &t1).unwrap(), before);
    }
}
