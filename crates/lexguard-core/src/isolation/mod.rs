//! Tenant Isolation Guard
//!
//! Entry point for every tenant-scoped operation. Each access attempt ends
//! in exactly one audit event:
//!
//! ```text
//! Requested ──► Denied                      (event: failed, permission code)
//!          └──► Granted ──► Succeeded       (event: success)
//!                       └─► Failed(reason)  (event: failed, error code)
//! ```

pub mod context;
pub mod query;
pub mod roles;

pub use context::{ClientInfo, TenantContext};
pub use query::{Filter, FilterOp, Join, QueryDescriptor};
pub use roles::{DataClassification, Permission, PermissionAction, ResourceType, Role};

use crate::audit::{
    ActionType, AuditEvent, AuditReport, AuditTrail, SecurityContext, SecurityThreat, Severity, ThreatStatus,
    ThreatType,
};
use crate::crypto::{EncryptedBlob, EncryptionEngine};
use chrono::{DateTime, Utc};
use lexguard_common::{ErrorCode, SecurityError, SecurityResult, TenantId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Result of a tenant integrity sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantIntegrityReport {
    pub tenant_id: TenantId,
    pub is_valid: bool,
    pub violations: Vec<String>,
    pub recommendations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Tenant isolation guard
pub struct TenantIsolationGuard {
    engine: Arc<EncryptionEngine>,
    audit: Arc<AuditTrail>,
}

impl TenantIsolationGuard {
    pub fn new(engine: Arc<EncryptionEngine>, audit: Arc<AuditTrail>) -> Self {
        Self { engine, audit }
    }

    /// Build the context of `user_id` acting for `organization_id`.
    pub fn create_tenant_context(
        &self,
        user_id: &str,
        organization_id: &str,
        role: Role,
    ) -> SecurityResult<TenantContext> {
        let ctx = TenantContext::for_role(user_id, organization_id, role)?;
        tracing::debug!(
            tenant_id = %ctx.tenant_id(),
            user_id = ctx.user_id(),
            role = %role,
            "Created tenant context"
        );
        Ok(ctx)
    }

    /// Scope `query` to the context's tenant and organization.
    pub fn apply_tenant_isolation(
        &self,
        query: QueryDescriptor,
        ctx: &TenantContext,
    ) -> SecurityResult<QueryDescriptor> {
        ctx.validate()?;
        let table = query.table.clone();
        let (scoped, conflicts) = query.scoped_to(ctx.tenant_id(), ctx.organization_id());
        if conflicts > 0 {
            tracing::warn!(
                tenant_id = %ctx.tenant_id(),
                user_id = ctx.user_id(),
                table = %table,
                conflicts,
                "Stripped tenant predicates that disagreed with the caller context"
            );
        }
        Ok(scoped)
    }

    /// Check `permission` on a resource and audit the decision.
    ///
    /// Denial is `Ok(false)`; only a malformed context is an error.
    pub async fn validate_resource_access(
        &self,
        resource_type: &ResourceType,
        resource_id: &str,
        ctx: &TenantContext,
        permission: Permission,
    ) -> SecurityResult<bool> {
        ctx.validate()?;
        let started = Instant::now();
        let resource_type = &resource_type.canonical();

        let denial = if !ctx.has_permission(permission) {
            Some((ErrorCode::InsufficientPermissions, "permission not granted to role"))
        } else if permission.resource_type() != *resource_type {
            Some((ErrorCode::InsufficientPermissions, "permission does not cover resource type"))
        } else if ctx.user_role().is_barred_from(resource_type) {
            Some((ErrorCode::RoleResourceForbidden, "role is barred from resource type"))
        } else {
            None
        };

        let classification = resource_type.classification();
        let mut event = AuditEvent::new(ctx.tenant_id().clone(), action_for(permission))
            .user(ctx.user_id())
            .resource(resource_type.clone(), resource_id)
            .client(ctx.ip_address(), ctx.user_agent())
            .with_security_context(SecurityContext {
                user_role: ctx.user_role(),
                permissions: ctx.permissions().iter().copied().collect(),
                data_classification: classification,
                requires_encryption: classification.requires_encryption(),
            })
            .duration_ms(started.elapsed().as_millis() as u64);

        if let Some((code, message)) = denial {
            tracing::info!(
                tenant_id = %ctx.tenant_id(),
                user_id = ctx.user_id(),
                resource_type = %resource_type,
                code = %code,
                "Access denied"
            );
            event = event.failed(code, message);
        }
        self.audit.log_event(event).await;
        Ok(denial.is_none())
    }

    /// Serialize and encrypt `value` for the context's tenant.
    pub async fn encrypt_tenant_data<T: Serialize + ?Sized>(
        &self,
        value: &T,
        ctx: &TenantContext,
    ) -> SecurityResult<EncryptedBlob> {
        ctx.validate()?;
        let started = Instant::now();

        let result = match serde_json::to_vec(value) {
            Ok(plaintext) => self.engine.encrypt_data(&plaintext, ctx.tenant_id()).await,
            Err(e) => Err(SecurityError::InvalidInput(format!("unserializable value: {}", e))),
        };

        let key_id = result.as_ref().ok().map(|b| b.key_id().to_string());
        self.audit_crypto(ctx, ActionType::Encrypt, key_id, result.as_ref().err(), started)
            .await;
        result
    }

    /// Decrypt a blob for the context's tenant.
    ///
    /// A blob whose key belongs to another tenant is a
    /// `TenantIsolationViolation` and raises a critical threat.
    pub async fn decrypt_tenant_data<T: DeserializeOwned>(
        &self,
        blob: &EncryptedBlob,
        ctx: &TenantContext,
    ) -> SecurityResult<T> {
        ctx.validate()?;
        let started = Instant::now();

        let result = self.decrypt_checked(blob, ctx).await;
        let error = result.as_ref().err();
        self.audit_crypto(ctx, ActionType::Decrypt, Some(blob.key_id().to_string()), error, started)
            .await;

        match error {
            Some(SecurityError::TenantIsolationViolation { .. }) => {
                let threat = SecurityThreat::new(
                    ctx.tenant_id().clone(),
                    ThreatType::CrossTenantAccessAttempt,
                    Severity::Critical,
                    format!("user {} presented data encrypted for another tenant", ctx.user_id()),
                )
                .user(Some(ctx.user_id().to_string()))
                .ip(ctx.ip_address().map(str::to_string))
                .resources(vec![format!("key:{}", blob.key_id())]);
                self.audit.log_security_threat(threat).await;
            }
            Some(SecurityError::IntegrityViolation(reason)) => {
                let threat = SecurityThreat::new(
                    ctx.tenant_id().clone(),
                    ThreatType::IntegrityViolation,
                    Severity::High,
                    format!("ciphertext failed verification: {}", reason),
                )
                .user(Some(ctx.user_id().to_string()))
                .ip(ctx.ip_address().map(str::to_string))
                .resources(vec![format!("key:{}", blob.key_id())]);
                self.audit.log_security_threat(threat).await;
            }
            _ => {}
        }
        result
    }

    async fn decrypt_checked<T: DeserializeOwned>(
        &self,
        blob: &EncryptedBlob,
        ctx: &TenantContext,
    ) -> SecurityResult<T> {
        let owners = self.engine.vault().key_owners(blob.key_id()).await?;
        if owners.iter().any(|owner| owner != ctx.tenant_id()) {
            tracing::error!(
                tenant_id = %ctx.tenant_id(),
                user_id = ctx.user_id(),
                key_id = %blob.key_id(),
                "Cross-tenant decryption attempt"
            );
            return Err(SecurityError::TenantIsolationViolation {
                requested: ctx.tenant_id().to_string(),
            });
        }

        let plaintext = self.engine.decrypt_data(blob, ctx.tenant_id()).await?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| SecurityError::InvalidInput(format!("decrypted payload: {}", e)))
    }

    async fn audit_crypto(
        &self,
        ctx: &TenantContext,
        action: ActionType,
        key_id: Option<String>,
        error: Option<&SecurityError>,
        started: Instant,
    ) {
        let mut event = AuditEvent::new(ctx.tenant_id().clone(), action)
            .user(ctx.user_id())
            .client(ctx.ip_address(), ctx.user_agent())
            .duration_ms(started.elapsed().as_millis() as u64);
        if let Some(key_id) = key_id {
            event = event.resource(ResourceType::EncryptionKey, key_id);
        }
        if let Some(error) = error {
            event = event.failed_with(error);
        }
        self.audit.log_event(event).await;
    }

    /// Sweep a tenant for isolation defects. Findings never error.
    pub async fn validate_tenant_integrity(&self, tenant_id: &TenantId) -> TenantIntegrityReport {
        let now = Utc::now();
        let mut violations = Vec::new();
        let mut recommendations = Vec::new();
        let vault = self.engine.vault();

        match vault.list_tenant_keys(tenant_id).await {
            Ok(keys) => {
                let active = keys.iter().filter(|k| k.is_active).count();
                if active > 1 {
                    violations.push(format!("{} active keys, expected at most one", active));
                }
                if active == 0 {
                    recommendations.push("Generate an encryption key for this tenant".to_string());
                }
                for key in &keys {
                    match vault.key_owners(&key.key_id).await {
                        Ok(owners) if owners.iter().any(|o| o != tenant_id) => {
                            violations.push(format!("key {} is shared with another tenant", key.key_id));
                        }
                        Ok(_) => {}
                        Err(e) => violations.push(format!("unable to verify owner of key {}: {}", key.key_id, e)),
                    }
                }
            }
            Err(e) => violations.push(format!("unable to list tenant keys: {}", e)),
        }

        if let Ok(true) = vault.is_key_rotation_needed_at(tenant_id, now).await {
            recommendations.push("Rotate the tenant encryption key".to_string());
        }

        for role in Role::ALL {
            for permission in role.orphaned_permissions() {
                violations.push(format!(
                    "role {} is granted {:?} on barred resource {}",
                    role,
                    permission,
                    permission.resource_type()
                ));
            }
        }

        match self.audit.list_threats(tenant_id, None).await {
            Ok(threats) => {
                let critical = threats
                    .iter()
                    .filter(|t| t.status != ThreatStatus::Resolved && t.severity == Severity::Critical)
                    .count();
                if critical > 0 {
                    recommendations.push(format!("Investigate {} open critical threats", critical));
                }
            }
            Err(e) => violations.push(format!("unable to list threats: {}", e)),
        }

        let is_valid = violations.is_empty();
        if !is_valid {
            tracing::warn!(tenant_id = %tenant_id, violations = violations.len(), "Tenant integrity check failed");
        }
        TenantIntegrityReport {
            tenant_id: tenant_id.clone(),
            is_valid,
            violations,
            recommendations,
            checked_at: now,
        }
    }

    /// Audit report with a key rotation reminder when one is due
    pub async fn generate_access_audit_report(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SecurityResult<AuditReport> {
        let mut report = self.audit.generate_audit_report(tenant_id, start, end).await?;
        if self.engine.vault().is_key_rotation_needed(tenant_id).await? {
            report
                .recommendations
                .push("Rotate the tenant encryption key: the active key exceeds the rotation interval".into());
        }
        Ok(report)
    }
}

fn action_for(permission: Permission) -> ActionType {
    match permission.action() {
        PermissionAction::Read => ActionType::Read,
        PermissionAction::Write => ActionType::Write,
        PermissionAction::Delete => ActionType::Delete,
        PermissionAction::Export => ActionType::Export,
    }
}
