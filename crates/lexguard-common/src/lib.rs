//! LexGuard Common Types
//!
//! Shared identifiers, error taxonomy and configuration for the LexGuard
//! tenant-isolated encryption and audit subsystem.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ids;

pub use config::{AuditConfig, BusinessHours, CryptoConfig, DetectionConfig, KeyPolicyConfig, SecurityConfig};
pub use error::{ErrorCode, SecurityError, SecurityResult};
pub use ids::{KeyId, TenantId};
