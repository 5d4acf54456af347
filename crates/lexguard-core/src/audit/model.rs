//! Audit events and security threats

use crate::isolation::{DataClassification, Permission, ResourceType, Role};
use chrono::{DateTime, Utc};
use lexguard_common::{ErrorCode, SecurityError, SecurityResult, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant recorded on events that arrive without one
pub const UNSCOPED_TENANT: &str = "_unscoped";

/// Audited action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    Login,
    Logout,
    Read,
    Write,
    Delete,
    Export,
    Encrypt,
    Decrypt,
    KeyGeneration,
    KeyRotation,
    AccessCheck,
    Other(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Export => "export",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::KeyGeneration => "key_generation",
            Self::KeyRotation => "key_rotation",
            Self::AccessCheck => "access_check",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "login" => Self::Login,
            "logout" => Self::Logout,
            "read" => Self::Read,
            "write" => Self::Write,
            "delete" => Self::Delete,
            "export" => Self::Export,
            "encrypt" => Self::Encrypt,
            "decrypt" => Self::Decrypt,
            "key_generation" => Self::KeyGeneration,
            "key_rotation" => Self::KeyRotation,
            "access_check" => Self::AccessCheck,
            _ => Self::Other(s),
        }
    }
}

impl From<ActionType> for String {
    fn from(a: ActionType) -> Self {
        match a {
            ActionType::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role and classification snapshot taken at access time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub user_role: Role,
    pub permissions: Vec<Permission>,
    pub data_classification: DataClassification,
    pub requires_encryption: bool,
}

/// Audit event
///
/// Only `tenant_id`, `action_type` and `timestamp` are required; everything
/// else is recorded when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    #[serde(default)]
    pub id: String,
    pub tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Successful event stamped now; `id` is assigned on append
    pub fn new(tenant_id: TenantId, action_type: ActionType) -> Self {
        Self {
            id: String::new(),
            tenant_id,
            user_id: None,
            action_type,
            resource_type: None,
            resource_id: None,
            security_context: None,
            success: true,
            error_code: None,
            error_message: None,
            ip_address: None,
            user_agent: None,
            duration_ms: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn resource(mut self, resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type);
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn failed(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_code = Some(code);
        self.error_message = Some(message.into());
        self
    }

    /// Failure from an error, keeping its audit code
    pub fn failed_with(self, error: &SecurityError) -> Self {
        self.failed(error.code(), error.to_string())
    }

    pub fn client(mut self, ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip_address.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_security_context(mut self, context: SecurityContext) -> Self {
        self.security_context = Some(context);
        self
    }

    /// Classification recorded at access time, or the resource default
    pub fn classification(&self) -> Option<DataClassification> {
        self.security_context
            .as_ref()
            .map(|c| c.data_classification)
            .or_else(|| self.resource_type.as_ref().map(|r| r.classification()))
    }

    pub fn is_security_event(&self) -> bool {
        !self.success && self.error_code.map(|c| c.is_security_relevant()).unwrap_or(false)
    }
}

// =============================================================================
// Threats
// =============================================================================

/// Threat type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ThreatType {
    BruteForceLogin,
    UnauthorizedAccessAttempt,
    SuspiciousActivity,
    CrossTenantAccessAttempt,
    IntegrityViolation,
    Other(String),
}

impl ThreatType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::BruteForceLogin => "brute_force_login",
            Self::UnauthorizedAccessAttempt => "unauthorized_access_attempt",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::CrossTenantAccessAttempt => "cross_tenant_access_attempt",
            Self::IntegrityViolation => "integrity_violation",
            Self::Other(name) => name,
        }
    }

    /// Counted as intrusion attempts in metrics
    pub fn is_intrusion(&self) -> bool {
        matches!(
            self,
            Self::BruteForceLogin | Self::UnauthorizedAccessAttempt | Self::CrossTenantAccessAttempt
        )
    }
}

impl From<String> for ThreatType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "brute_force_login" => Self::BruteForceLogin,
            "unauthorized_access_attempt" => Self::UnauthorizedAccessAttempt,
            "suspicious_activity" => Self::SuspiciousActivity,
            "cross_tenant_access_attempt" => Self::CrossTenantAccessAttempt,
            "integrity_violation" => Self::IntegrityViolation,
            _ => Self::Other(s),
        }
    }
}

impl From<ThreatType> for String {
    fn from(t: ThreatType) -> Self {
        match t {
            ThreatType::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Threat lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatStatus {
    Detected,
    Investigating,
    Resolved,
}

impl ThreatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    /// `detected -> investigating -> resolved`, or `detected -> resolved`
    pub fn can_transition_to(&self, next: ThreatStatus) -> bool {
        matches!(
            (self, next),
            (Self::Detected, Self::Investigating)
                | (Self::Detected, Self::Resolved)
                | (Self::Investigating, Self::Resolved)
        )
    }
}

/// Security threat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityThreat {
    pub id: String,
    pub tenant_id: TenantId,
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub description: String,
    pub affected_resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub status: ThreatStatus,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecurityThreat {
    pub fn new(
        tenant_id: TenantId,
        threat_type: ThreatType,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            threat_type,
            severity,
            description: description.into(),
            affected_resources: Vec::new(),
            user_id: None,
            ip_address: None,
            status: ThreatStatus::Detected,
            detected_at: now,
            updated_at: now,
        }
    }

    pub fn user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn resources(mut self, resources: Vec<String>) -> Self {
        self.affected_resources = resources;
        self
    }

    pub fn detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = at;
        self.updated_at = at;
        self
    }

    /// Same detection pattern: type, user and source address
    pub fn same_pattern(&self, other: &SecurityThreat) -> bool {
        self.threat_type == other.threat_type
            && self.user_id == other.user_id
            && self.ip_address == other.ip_address
    }

    /// Apply a status change, enforcing the lifecycle
    pub fn transition(&mut self, next: ThreatStatus, at: DateTime<Utc>) -> SecurityResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SecurityError::InvalidThreatTransition {
                from: self.status.as_str().into(),
                to: next.as_str().into(),
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}
