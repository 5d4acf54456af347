//! Tenant context

use super::roles::{Permission, Role};
use lexguard_common::{SecurityError, SecurityResult, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Client connection details carried into audit events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Who is acting, and for which tenant
///
/// Immutable once built. The guard re-validates it on every call, so a
/// context assembled with [`TenantContext::from_parts`] cannot smuggle in a
/// tenant id that does not belong to its organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    tenant_id: TenantId,
    organization_id: String,
    user_id: String,
    user_role: Role,
    permissions: BTreeSet<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client: Option<ClientInfo>,
}

impl TenantContext {
    pub(crate) fn for_role(user_id: &str, organization_id: &str, role: Role) -> SecurityResult<Self> {
        let ctx = Self {
            tenant_id: TenantId::from_organization(organization_id),
            organization_id: organization_id.trim().to_string(),
            user_id: user_id.trim().to_string(),
            user_role: role,
            permissions: role.permissions().iter().copied().collect(),
            client: None,
        };
        ctx.validate()?;
        Ok(ctx)
    }

    /// Assemble a context without checks, e.g. from a session store.
    pub fn from_parts(
        tenant_id: TenantId,
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        user_role: Role,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            tenant_id,
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            user_role,
            permissions: permissions.into_iter().collect(),
            client: None,
        }
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.client = Some(ClientInfo { ip_address, user_agent });
        self
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_role(&self) -> Role {
        self.user_role
    }

    pub fn permissions(&self) -> &BTreeSet<Permission> {
        &self.permissions
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.client.as_ref().and_then(|c| c.ip_address.as_deref())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.client.as_ref().and_then(|c| c.user_agent.as_deref())
    }

    /// Structural validation
    pub fn validate(&self) -> SecurityResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(SecurityError::InvalidContext("empty user id".into()));
        }
        if self.organization_id.trim().is_empty() {
            return Err(SecurityError::InvalidContext("empty organization id".into()));
        }
        if self.tenant_id.is_empty() {
            return Err(SecurityError::InvalidContext("empty tenant id".into()));
        }
        if self.tenant_id != TenantId::from_organization(&self.organization_id) {
            return Err(SecurityError::InvalidContext(format!(
                "tenant {} does not belong to organization {}",
                self.tenant_id, self.organization_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_organization_same_tenant() {
        let a = TenantContext::for_role("u1", "cabinet-martin", Role::Avocat).unwrap();
        let b = TenantContext::for_role("u2", "cabinet-martin", Role::Etudiant).unwrap();
        let c = TenantContext::for_role("u3", "etude-durand", Role::Notaire).unwrap();

        assert_eq!(a.tenant_id(), b.tenant_id());
        assert_ne!(a.tenant_id(), c.tenant_id());
        assert!(a.has_permission(Permission::ReadDossier));
        assert!(!b.has_permission(Permission::ReadDossier));
    }

    #[test]
    fn test_empty_ids_rejected() {
        assert!(TenantContext::for_role("", "org", Role::Avocat).is_err());
        assert!(TenantContext::for_role("u1", "  ", Role::Avocat).is_err());
    }

    #[test]
    fn test_forged_tenant_rejected() {
        let forged = TenantContext::from_parts(
            TenantId::new("tenant_other"),
            "cabinet-martin",
            "u1",
            Role::Administrateur,
            Permission::ALL,
        );
        assert!(matches!(forged.validate(), Err(SecurityError::InvalidContext(_))));
    }

    #[test]
    fn test_client_info() {
        let ctx = TenantContext::for_role("u1", "org", Role::Juriste)
            .unwrap()
            .with_client(Some("10.0.0.7".into()), None);
        assert_eq!(ctx.ip_address(), Some("10.0.0.7"));
        assert_eq!(ctx.user_agent(), None);
    }
}
