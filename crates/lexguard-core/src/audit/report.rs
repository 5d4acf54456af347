//! Audit reports and live metrics

use super::model::{AuditEvent, SecurityThreat, Severity, ThreatType};
use chrono::{DateTime, Timelike, Utc};
use lexguard_common::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

const TOP_N: usize = 10;
const MAX_SECURITY_EVENTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user_id: String,
    pub event_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceActivity {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub access_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyActivity {
    pub hour: u32,
    pub event_count: usize,
}

/// Audit report for one tenant and period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub tenant_id: TenantId,
    pub period: ReportPeriod,
    pub total_events: usize,
    pub successful_events: usize,
    pub failed_events: usize,
    /// Percentage, 100 for an empty period
    pub success_rate: f64,
    pub top_users: Vec<UserActivity>,
    pub top_resources: Vec<ResourceActivity>,
    /// Failed security-relevant events, most recent first
    pub security_events: Vec<AuditEvent>,
    /// One bucket per UTC hour of day
    pub hourly_activity: Vec<HourlyActivity>,
    pub threats: Vec<SecurityThreat>,
    pub recommendations: Vec<String>,
}

/// Live metrics over the configured window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Mean `duration_ms` of events that carry one
    pub average_response_time: f64,
    pub security_events: usize,
    pub threats_detected: usize,
    pub intrusion_attempts: usize,
    pub active_users: usize,
}

pub(crate) fn build_report(
    tenant_id: &TenantId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    events: &[AuditEvent],
    threats: Vec<SecurityThreat>,
) -> AuditReport {
    let successful_events = events.iter().filter(|e| e.success).count();
    let failed_events = events.len() - successful_events;
    let total_events = successful_events + failed_events;
    let success_rate = if total_events == 0 {
        100.0
    } else {
        successful_events as f64 * 100.0 / total_events as f64
    };

    let mut users: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut resources: HashMap<(String, Option<String>), usize> = HashMap::new();
    let mut hourly = [0usize; 24];
    for event in events {
        if let Some(user) = event.user_id.as_deref() {
            let entry = users.entry(user).or_default();
            entry.0 += 1;
            if !event.success {
                entry.1 += 1;
            }
        }
        if let Some(resource_type) = &event.resource_type {
            *resources
                .entry((resource_type.to_string(), event.resource_id.clone()))
                .or_default() += 1;
        }
        hourly[event.timestamp.hour() as usize] += 1;
    }

    let mut top_users: Vec<UserActivity> = users
        .into_iter()
        .map(|(user_id, (event_count, failed_count))| UserActivity {
            user_id: user_id.to_string(),
            event_count,
            failed_count,
        })
        .collect();
    top_users.sort_by(|a, b| b.event_count.cmp(&a.event_count).then_with(|| a.user_id.cmp(&b.user_id)));
    top_users.truncate(TOP_N);

    let mut top_resources: Vec<ResourceActivity> = resources
        .into_iter()
        .map(|((resource_type, resource_id), access_count)| ResourceActivity {
            resource_type,
            resource_id,
            access_count,
        })
        .collect();
    top_resources.sort_by(|a, b| {
        b.access_count
            .cmp(&a.access_count)
            .then_with(|| a.resource_type.cmp(&b.resource_type))
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
    top_resources.truncate(TOP_N);

    let security_events: Vec<AuditEvent> = events
        .iter()
        .rev()
        .filter(|e| e.is_security_event())
        .take(MAX_SECURITY_EVENTS)
        .cloned()
        .collect();
    let security_event_count = events.iter().filter(|e| e.is_security_event()).count();

    let recommendations = recommendations(total_events, success_rate, security_event_count, &threats);

    AuditReport {
        tenant_id: tenant_id.clone(),
        period: ReportPeriod { start, end },
        total_events,
        successful_events,
        failed_events,
        success_rate,
        top_users,
        top_resources,
        security_events,
        hourly_activity: hourly
            .iter()
            .enumerate()
            .map(|(hour, &event_count)| HourlyActivity { hour: hour as u32, event_count })
            .collect(),
        threats,
        recommendations,
    }
}

fn recommendations(
    total_events: usize,
    success_rate: f64,
    security_events: usize,
    threats: &[SecurityThreat],
) -> Vec<String> {
    let mut out = Vec::new();
    if total_events > 0 && success_rate < 90.0 {
        out.push(format!(
            "Success rate is {:.1}%: review failing operations and user permissions",
            success_rate
        ));
    }
    if security_events > 0 {
        out.push(format!("Investigate {} security-relevant failures", security_events));
    }
    let open: Vec<&SecurityThreat> = threats.iter().filter(|t| t.status.is_open()).collect();
    if open.iter().any(|t| t.severity >= Severity::Critical) {
        out.push("Resolve open critical threats before the next reporting period".into());
    }
    if open.iter().any(|t| t.threat_type == ThreatType::BruteForceLogin) {
        out.push("Enable account lockout and multi-factor authentication".into());
    }
    if open.iter().any(|t| t.threat_type == ThreatType::CrossTenantAccessAttempt) {
        out.push("Audit integrations presenting data from other tenants".into());
    }
    if open.iter().any(|t| t.threat_type == ThreatType::SuspiciousActivity) {
        out.push("Confirm off-hours exports and deletions of secret records with their authors".into());
    }
    out
}

pub(crate) fn build_metrics(events: &[AuditEvent], threats: &[SecurityThreat]) -> Metrics {
    let successful_requests = events.iter().filter(|e| e.success).count();
    let durations: Vec<u64> = events.iter().filter_map(|e| e.duration_ms).collect();
    let average_response_time = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<u64>() as f64 / durations.len() as f64
    };
    let active_users: BTreeSet<&str> = events.iter().filter_map(|e| e.user_id.as_deref()).collect();

    Metrics {
        total_requests: events.len(),
        successful_requests,
        failed_requests: events.len() - successful_requests,
        average_response_time,
        security_events: events.iter().filter(|e| e.is_security_event()).count(),
        threats_detected: threats.len(),
        intrusion_attempts: threats.iter().filter(|t| t.threat_type.is_intrusion()).count(),
        active_users: active_users.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::model::ActionType;
    use crate::isolation::ResourceType;
    use chrono::TimeZone;
    use lexguard_common::ErrorCode;

    fn tenant() -> TenantId {
        TenantId::new("t1")
    }

    #[test]
    fn test_empty_period() {
        let now = Utc::now();
        let report = build_report(&tenant(), now, now, &[], Vec::new());
        assert_eq!(report.total_events, 0);
        assert_eq!(report.success_rate, 100.0);
        assert_eq!(report.hourly_activity.len(), 24);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_counts_and_rankings() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(
                AuditEvent::new(tenant(), ActionType::Read)
                    .user("alice")
                    .resource(ResourceType::DossierClient, "d-1")
                    .at(at),
            );
        }
        events.push(
            AuditEvent::new(tenant(), ActionType::Read)
                .user("bob")
                .resource(ResourceType::Acte, "a-9")
                .failed(ErrorCode::InsufficientPermissions, "denied")
                .at(at),
        );

        let report = build_report(&tenant(), at, at, &events, Vec::new());
        assert_eq!(report.total_events, 4);
        assert_eq!(report.successful_events + report.failed_events, report.total_events);
        assert_eq!(report.success_rate, 75.0);
        assert_eq!(report.top_users[0].user_id, "alice");
        assert_eq!(report.top_resources[0].resource_id.as_deref(), Some("d-1"));
        assert_eq!(report.hourly_activity[14].event_count, 4);
        assert_eq!(report.security_events.len(), 1);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_metrics() {
        let events = vec![
            AuditEvent::new(tenant(), ActionType::Read).user("a").duration_ms(10),
            AuditEvent::new(tenant(), ActionType::Read).user("a").duration_ms(30),
            AuditEvent::new(tenant(), ActionType::Login)
                .user("b")
                .failed(ErrorCode::InvalidCredentials, "bad password"),
        ];
        let threats = vec![SecurityThreat::new(
            tenant(),
            ThreatType::BruteForceLogin,
            Severity::High,
            "x",
        )];

        let metrics = build_metrics(&events, &threats);
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.average_response_time, 20.0);
        assert_eq!(metrics.security_events, 1);
        assert_eq!(metrics.intrusion_attempts, 1);
        assert_eq!(metrics.active_users, 2);
    }
}
