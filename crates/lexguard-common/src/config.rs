//! LexGuard Configuration

use crate::error::SecurityError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Key lifecycle
    pub keys: KeyPolicyConfig,
    /// Data protection
    pub crypto: CryptoConfig,
    /// Audit log
    pub audit: AuditConfig,
    /// Intrusion detection
    pub detection: DetectionConfig,
}

impl SecurityConfig {
    /// Load from file
    pub fn load(path: &str) -> Result<Self, SecurityError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SecurityError::Config(format!("{}: {}", path, e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> Result<Self, SecurityError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| SecurityError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SecurityError> {
        if self.keys.rotation_interval_days == 0 {
            return Err(SecurityError::Config("keys.rotation_interval_days must be > 0".into()));
        }
        if self.crypto.file_chunk_size < 1024 || self.crypto.file_chunk_size > 16 * 1024 * 1024 {
            return Err(SecurityError::Config(
                "crypto.file_chunk_size must be between 1 KiB and 16 MiB".into(),
            ));
        }
        if self.crypto.search_pepper.len() < 16 {
            return Err(SecurityError::Config("crypto.search_pepper must be at least 16 bytes".into()));
        }
        if self.audit.retention_days == 0 {
            return Err(SecurityError::Config("audit.retention_days must be > 0".into()));
        }
        if self.detection.window_minutes == 0 {
            return Err(SecurityError::Config("detection.window_minutes must be > 0".into()));
        }
        if self.detection.brute_force_threshold == 0 || self.detection.unauthorized_threshold == 0 {
            return Err(SecurityError::Config("detection thresholds must be > 0".into()));
        }
        self.detection.business_hours.validate()
    }
}

/// Key rotation and store retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPolicyConfig {
    /// Maximum age of an active key
    pub rotation_interval_days: u32,
    /// Attempts for transient key-store failures
    pub store_retry_attempts: u32,
    /// Base delay between attempts, doubled each time
    pub retry_backoff_ms: u64,
}

impl Default for KeyPolicyConfig {
    fn default() -> Self {
        Self {
            rotation_interval_days: 90,
            store_retry_attempts: 3,
            retry_backoff_ms: 25,
        }
    }
}

impl KeyPolicyConfig {
    pub fn rotation_interval_secs(&self) -> i64 {
        self.rotation_interval_days as i64 * 86_400
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms * (1 << attempt.min(5)))
    }
}

/// Data protection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Plaintext bytes per file chunk
    pub file_chunk_size: usize,
    /// Deployment secret mixed into searchable hashes
    pub search_pepper: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            file_chunk_size: 64 * 1024,
            search_pepper: "lexguard-development-pepper".into(),
        }
    }
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Events older than this are removed by the retention sweep
    pub retention_days: u32,
    /// Upper bound on a single store append
    pub append_timeout_ms: u64,
    /// Events parked while the store is unavailable
    pub pending_capacity: usize,
    /// Rolling window for live metrics
    pub metrics_window_minutes: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 5 * 365,
            append_timeout_ms: 500,
            pending_capacity: 10_000,
            metrics_window_minutes: 60,
        }
    }
}

impl AuditConfig {
    pub fn append_timeout(&self) -> Duration {
        Duration::from_millis(self.append_timeout_ms)
    }
}

/// Intrusion detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Sliding window evaluated by the heuristics
    pub window_minutes: u32,
    /// Failed logins that make a brute-force pattern
    pub brute_force_threshold: usize,
    /// Permission denials per user that make an unauthorized-access pattern
    pub unauthorized_threshold: usize,
    /// Window outside of which destructive actions on secret data are flagged
    pub business_hours: BusinessHours,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            brute_force_threshold: 6,
            unauthorized_threshold: 3,
            business_hours: BusinessHours::default(),
        }
    }
}

/// Business-hours window in local office time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessHours {
    /// First hour inside the window (0-23)
    pub start_hour: u32,
    /// First hour after the window (1-24)
    pub end_hour: u32,
    /// Office offset from UTC
    pub utc_offset_minutes: i32,
    /// Whether Saturday and Sunday count as business days
    pub include_weekends: bool,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 19,
            utc_offset_minutes: 60,
            include_weekends: false,
        }
    }
}

impl BusinessHours {
    pub fn validate(&self) -> Result<(), SecurityError> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(SecurityError::Config(
                "business_hours requires start_hour < end_hour <= 24".into(),
            ));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(SecurityError::Config("business_hours.utc_offset_minutes out of range".into()));
        }
        Ok(())
    }
}
