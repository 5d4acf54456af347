//! Intrusion heuristics over a window of audit events
//!
//! Rules:
//! - failed logins across the tenant reaching the brute-force threshold
//! - permission denials for one user reaching the unauthorized threshold
//! - successful delete/export of secret data outside business hours
//!
//! Off-hours activity is flagged, never blocked.

use super::model::{ActionType, AuditEvent, SecurityThreat, Severity, ThreatType};
use crate::isolation::DataClassification;
use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use lexguard_common::{BusinessHours, DetectionConfig, TenantId};
use std::collections::{BTreeMap, BTreeSet};

/// Candidate threats for `events`, before de-duplication
pub(crate) fn detect(
    tenant_id: &TenantId,
    events: &[AuditEvent],
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Vec<SecurityThreat> {
    let mut threats = Vec::new();
    threats.extend(brute_force(tenant_id, events, config, now));
    threats.extend(unauthorized_access(tenant_id, events, config, now));
    threats.extend(off_hours_activity(tenant_id, events, config, now));
    threats
}

fn brute_force(
    tenant_id: &TenantId,
    events: &[AuditEvent],
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Option<SecurityThreat> {
    let failed: Vec<&AuditEvent> = events
        .iter()
        .filter(|e| e.action_type == ActionType::Login && !e.success)
        .collect();
    let threshold = config.brute_force_threshold.max(1);
    if failed.len() < threshold {
        return None;
    }

    let severity = if failed.len() >= threshold * 2 {
        Severity::Critical
    } else {
        Severity::High
    };
    let targeted: BTreeSet<String> = failed.iter().filter_map(|e| e.user_id.clone()).collect();

    tracing::warn!(tenant_id = %tenant_id, attempts = failed.len(), "Brute force login pattern detected");
    Some(
        SecurityThreat::new(
            tenant_id.clone(),
            ThreatType::BruteForceLogin,
            severity,
            format!(
                "{} failed login attempts in the last {} minutes",
                failed.len(),
                config.window_minutes
            ),
        )
        .resources(targeted.into_iter().collect())
        .detected_at(now),
    )
}

fn unauthorized_access(
    tenant_id: &TenantId,
    events: &[AuditEvent],
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Vec<SecurityThreat> {
    let mut by_user: BTreeMap<&str, Vec<&AuditEvent>> = BTreeMap::new();
    for event in events {
        let denied = !event.success && event.error_code.map(|c| c.is_permission_denial()).unwrap_or(false);
        if let (true, Some(user)) = (denied, event.user_id.as_deref()) {
            by_user.entry(user).or_default().push(event);
        }
    }

    let threshold = config.unauthorized_threshold.max(1);
    by_user
        .into_iter()
        .filter(|(_, denials)| denials.len() >= threshold)
        .map(|(user, denials)| {
            let severity = if denials.len() >= threshold * 2 {
                Severity::High
            } else {
                Severity::Medium
            };
            tracing::warn!(tenant_id = %tenant_id, user_id = user, denials = denials.len(), "Repeated unauthorized access attempts");
            SecurityThreat::new(
                tenant_id.clone(),
                ThreatType::UnauthorizedAccessAttempt,
                severity,
                format!("{} denied access attempts by user {}", denials.len(), user),
            )
            .user(Some(user.to_string()))
            .ip(common_ip(&denials))
            .resources(resources(&denials))
            .detected_at(now)
        })
        .collect()
}

fn off_hours_activity(
    tenant_id: &TenantId,
    events: &[AuditEvent],
    config: &DetectionConfig,
    now: DateTime<Utc>,
) -> Vec<SecurityThreat> {
    let mut by_user: BTreeMap<Option<&str>, Vec<&AuditEvent>> = BTreeMap::new();
    for event in events.iter().filter(|e| {
        e.success
            && matches!(e.action_type, ActionType::Delete | ActionType::Export)
            && e.classification() == Some(DataClassification::Secret)
            && !within_business_hours(e.timestamp, &config.business_hours)
    }) {
        by_user.entry(event.user_id.as_deref()).or_default().push(event);
    }

    by_user
        .into_iter()
        .map(|(user, flagged)| {
            tracing::info!(tenant_id = %tenant_id, user_id = user.unwrap_or("unknown"), operations = flagged.len(), "Off-hours access to secret data");
            SecurityThreat::new(
                tenant_id.clone(),
                ThreatType::SuspiciousActivity,
                Severity::Medium,
                format!(
                    "{} delete/export operations on secret data outside business hours (low confidence)",
                    flagged.len()
                ),
            )
            .user(user.map(str::to_string))
            .ip(common_ip(&flagged))
            .resources(resources(&flagged))
            .detected_at(now)
        })
        .collect()
}

/// Whether `at` falls inside the configured working hours
pub fn within_business_hours(at: DateTime<Utc>, hours: &BusinessHours) -> bool {
    let offset = FixedOffset::east_opt(hours.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    let local = at.with_timezone(&offset);
    if !hours.include_weekends && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let hour = local.hour();
    hour >= hours.start_hour && hour < hours.end_hour
}

/// Source address shared by every event, if any
fn common_ip(events: &[&AuditEvent]) -> Option<String> {
    let first = events.first()?.ip_address.as_ref()?;
    events
        .iter()
        .all(|e| e.ip_address.as_ref() == Some(first))
        .then(|| first.clone())
}

fn resources(events: &[&AuditEvent]) -> Vec<String> {
    let set: BTreeSet<String> = events
        .iter()
        .filter_map(|e| match (&e.resource_type, &e.resource_id) {
            (Some(t), Some(id)) => Some(format!("{}:{}", t, id)),
            (Some(t), None) => Some(t.to_string()),
            _ => None,
        })
        .collect();
    set.into_iter().collect()
}
