//! Error taxonomy for LexGuard

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// LexGuard error type
///
/// Every cryptographic or key-resolution failure has its own variant so that
/// callers and the audit log can tell "no such key" apart from "wrong tenant"
/// apart from "tampered data". The message text is for humans only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// No active key exists for the tenant
    #[error("no active encryption key for tenant {tenant_id}")]
    EncryptionKeyNotFound { tenant_id: String },

    /// The key referenced by a blob cannot be resolved for the tenant
    #[error("decryption key {key_id} not available for tenant {tenant_id}")]
    DecryptionKeyNotFound { tenant_id: String, key_id: String },

    /// Raw vault lookup failure
    #[error("key {key_id} not found for tenant {tenant_id}")]
    KeyNotFound { tenant_id: String, key_id: String },

    /// Data produced for one tenant was presented under another
    #[error("tenant isolation violation: tenant {requested} cannot access data of another tenant")]
    TenantIsolationViolation { requested: String },

    /// Authentication tag did not verify
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Empty or malformed payload
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Structurally empty tenant/organization/user id
    #[error("invalid tenant context: {0}")]
    InvalidContext(String),

    /// Threat id unknown for the tenant
    #[error("security threat not found: {0}")]
    ThreatNotFound(String),

    /// Threat status change not allowed
    #[error("invalid threat transition: {from} -> {to}")]
    InvalidThreatTransition { from: String, to: String },

    /// Persistence failure
    #[error("storage error: {message}")]
    Storage { message: String, transient: bool },

    /// Caller stream failure during file encryption
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl SecurityError {
    /// Audit error code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EncryptionKeyNotFound { .. } => ErrorCode::EncryptionKeyNotFound,
            Self::DecryptionKeyNotFound { .. } | Self::KeyNotFound { .. } => {
                ErrorCode::DecryptionKeyNotFound
            }
            Self::TenantIsolationViolation { .. } => ErrorCode::TenantIsolationViolation,
            Self::IntegrityViolation(_) => ErrorCode::IntegrityViolation,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::InvalidContext(_) => ErrorCode::InvalidContext,
            Self::ThreatNotFound(_) | Self::InvalidThreatTransition { .. } => ErrorCode::InvalidInput,
            Self::Storage { .. } | Self::Io(_) => ErrorCode::StorageUnavailable,
            Self::Config(_) => ErrorCode::InvalidInput,
        }
    }

    /// Only transient persistence failures may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { transient: true, .. })
    }

    /// True for failures that indicate an attack or corruption rather than a
    /// missing resource.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::TenantIsolationViolation { .. } | Self::IntegrityViolation(_)
        )
    }
}

/// Result type for LexGuard
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Error codes recorded on audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientPermissions,
    RoleResourceForbidden,
    EncryptionKeyNotFound,
    DecryptionKeyNotFound,
    TenantIsolationViolation,
    IntegrityViolation,
    InvalidInput,
    InvalidContext,
    InvalidCredentials,
    StorageUnavailable,
}

impl ErrorCode {
    /// Stable wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::RoleResourceForbidden => "ROLE_RESOURCE_FORBIDDEN",
            Self::EncryptionKeyNotFound => "ENCRYPTION_KEY_NOT_FOUND",
            Self::DecryptionKeyNotFound => "DECRYPTION_KEY_NOT_FOUND",
            Self::TenantIsolationViolation => "TENANT_ISOLATION_VIOLATION",
            Self::IntegrityViolation => "INTEGRITY_VIOLATION",
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidContext => "INVALID_CONTEXT",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
        }
    }

    /// Codes that count as security events in metrics and reports
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::InsufficientPermissions
                | Self::RoleResourceForbidden
                | Self::DecryptionKeyNotFound
                | Self::TenantIsolationViolation
                | Self::IntegrityViolation
                | Self::InvalidCredentials
        )
    }

    /// Codes counted by the unauthorized-access heuristic
    pub fn is_permission_denial(&self) -> bool {
        matches!(self, Self::InsufficientPermissions | Self::RoleResourceForbidden)
    }
}

impl From<std::io::Error> for SecurityError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
