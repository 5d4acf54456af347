//! LexGuard - Tenant-Isolated Encryption & Security Audit
//!
//! Per-tenant encryption, tenant isolation and security auditing for a
//! multi-tenant legal practice platform.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              LEXGUARD                               │
//! │                                                                     │
//! │   callers ──► ┌──────────────────────────────┐                      │
//! │               │   TENANT ISOLATION GUARD     │                      │
//! │               │ context │ query scope │ RBAC │                      │
//! │               └──────┬───────────────┬───────┘                      │
//! │                      │               │                              │
//! │          ┌───────────▼──────┐  ┌─────▼───────────────────────┐      │
//! │          │ ENCRYPTION ENGINE│  │        AUDIT TRAIL          │      │
//! │          │ AES-256-GCM │ HMAC│  │ events │ threats │ reports │      │
//! │          └───────────┬──────┘  └─────┬───────────────────────┘      │
//! │                      │               │                              │
//! │          ┌───────────▼──────┐  ┌─────▼──────┐                       │
//! │          │    KEY VAULT     │  │ AUDIT STORE│                       │
//! │          │  (KeyStore)      │  │            │                       │
//! │          └──────────────────┘  └────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Key material never leaves the vault/engine boundary. Every decrypt
//! resolves its key through the caller's own tenant.

pub mod audit;
pub mod crypto;
pub mod isolation;
pub mod keys;
pub mod maintenance;
pub mod store;

pub use audit::{AuditEvent, AuditReport, AuditStore, AuditTrail, InMemoryAuditStore, Metrics, SecurityThreat};
pub use crypto::{EncryptedBlob, EncryptionEngine, FileEncryptionSummary};
pub use isolation::{
    Permission, QueryDescriptor, ResourceType, Role, TenantContext, TenantIntegrityReport,
    TenantIsolationGuard,
};
pub use keys::{InMemoryKeyStore, KeyStore, KeyVault, TenantKey};
pub use lexguard_common::{ErrorCode, KeyId, SecurityConfig, SecurityError, SecurityResult, TenantId};
pub use maintenance::{spawn_maintenance, MaintenanceHandle, MaintenanceReport};
pub use store::{StoreError, StoreResult};

use audit::ActionType;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// LexGuard subsystem, built once per process
pub struct LexGuard {
    config: SecurityConfig,
    vault: Arc<KeyVault>,
    engine: Arc<EncryptionEngine>,
    audit: Arc<AuditTrail>,
    guard: TenantIsolationGuard,
}

impl LexGuard {
    /// Wire the subsystem over the given stores.
    pub fn new(
        config: SecurityConfig,
        key_store: Arc<dyn KeyStore>,
        audit_store: Arc<dyn AuditStore>,
    ) -> SecurityResult<Self> {
        config.validate()?;

        let vault = Arc::new(KeyVault::new(key_store, config.keys.clone()));
        let engine = Arc::new(EncryptionEngine::new(vault.clone(), config.crypto.clone()));
        let audit = Arc::new(AuditTrail::new(
            audit_store,
            config.audit.clone(),
            config.detection.clone(),
        ));
        let guard = TenantIsolationGuard::new(engine.clone(), audit.clone());

        tracing::info!(
            rotation_interval_days = config.keys.rotation_interval_days,
            retention_days = config.audit.retention_days,
            "LexGuard initialized"
        );
        Ok(Self { config, vault, engine, audit, guard })
    }

    /// In-memory stores, for tests and single-process deployments
    pub fn in_memory(config: SecurityConfig) -> SecurityResult<Self> {
        Self::new(config, Arc::new(InMemoryKeyStore::new()), Arc::new(InMemoryAuditStore::new()))
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn engine(&self) -> &Arc<EncryptionEngine> {
        &self.engine
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn guard(&self) -> &TenantIsolationGuard {
        &self.guard
    }

    /// Ensure the tenant has an active key, generating the first one.
    pub async fn provision_tenant(&self, tenant_id: &TenantId) -> SecurityResult<TenantKey> {
        if let Some(key) = self.vault.active_key(tenant_id).await? {
            return Ok(key);
        }
        let started = Instant::now();
        let result = self.vault.generate_tenant_key(tenant_id).await;
        self.audit_key_event(tenant_id, ActionType::KeyGeneration, &result, started).await;
        result
    }

    /// Audited key rotation
    pub async fn rotate_tenant_key(&self, tenant_id: &TenantId) -> SecurityResult<TenantKey> {
        let started = Instant::now();
        let result = self.vault.rotate_tenant_key(tenant_id).await;
        self.audit_key_event(tenant_id, ActionType::KeyRotation, &result, started).await;
        result
    }

    /// Start background maintenance on the current tokio runtime.
    pub fn spawn_maintenance(&self, interval: Duration) -> SecurityResult<MaintenanceHandle> {
        spawn_maintenance(self.vault.clone(), self.audit.clone(), interval)
    }

    async fn audit_key_event(
        &self,
        tenant_id: &TenantId,
        action: ActionType,
        result: &SecurityResult<TenantKey>,
        started: Instant,
    ) {
        let event = AuditEvent::new(tenant_id.clone(), action).duration_ms(started.elapsed().as_millis() as u64);
        let event = match result {
            Ok(key) => event.resource(ResourceType::EncryptionKey, key.key_id.to_string()),
            Err(e) => event.failed_with(e),
        };
        self.audit.log_event(event).await;
    }
}
