//! Audit Trail
//!
//! Append-only event log, threat register and intrusion detection. Logging
//! never fails the caller: a store that errors or stalls sends the record to
//! a bounded pending buffer instead.

pub mod detection;
pub mod model;
pub mod report;
pub mod store;

pub use model::{
    ActionType, AuditEvent, SecurityContext, SecurityThreat, Severity, ThreatStatus, ThreatType,
    UNSCOPED_TENANT,
};
pub use report::{AuditReport, HourlyActivity, Metrics, ReportPeriod, ResourceActivity, UserActivity};
pub use store::{AuditStore, InMemoryAuditStore};

use crate::store::StoreError;
use chrono::{DateTime, Duration, Utc};
use lexguard_common::{AuditConfig, DetectionConfig, SecurityError, SecurityResult, TenantId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Record waiting for the store to come back
#[derive(Debug, Clone)]
enum PendingRecord {
    Event(AuditEvent),
    Threat(SecurityThreat),
}

/// Retention sweep result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub tenants: usize,
    pub events_removed: usize,
    pub threats_removed: usize,
}

/// Audit trail
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    config: AuditConfig,
    detection: DetectionConfig,
    pending: Mutex<VecDeque<PendingRecord>>,
    dropped: AtomicU64,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>, config: AuditConfig, detection: DetectionConfig) -> Self {
        Self {
            store,
            config,
            detection,
            pending: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an event and return its id.
    pub async fn log_event(&self, mut event: AuditEvent) -> String {
        if event.id.trim().is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }
        if event.tenant_id.is_empty() {
            tracing::warn!(event_id = %event.id, action = %event.action_type, "Audit event without tenant");
            event.tenant_id = TenantId::new(UNSCOPED_TENANT);
        }

        let id = event.id.clone();
        let record = PendingRecord::Event(event);
        if !self.write(&record).await {
            self.park(record);
        }
        id
    }

    /// Record a threat of any severity and return its id.
    pub async fn log_security_threat(&self, threat: SecurityThreat) -> String {
        let id = threat.id.clone();
        match threat.severity {
            Severity::Critical | Severity::High => tracing::error!(
                tenant_id = %threat.tenant_id,
                threat_id = %threat.id,
                threat_type = %threat.threat_type,
                "Security threat recorded"
            ),
            _ => tracing::warn!(
                tenant_id = %threat.tenant_id,
                threat_id = %threat.id,
                threat_type = %threat.threat_type,
                "Security threat recorded"
            ),
        }

        let record = PendingRecord::Threat(threat);
        if !self.write(&record).await {
            self.park(record);
        }
        id
    }

    /// Replay parked records; returns how many reached the store.
    pub async fn flush_pending(&self) -> usize {
        let batch: Vec<PendingRecord> = self.pending.lock().drain(..).collect();
        if batch.is_empty() {
            return 0;
        }

        let mut flushed = 0;
        let mut remaining = batch.into_iter();
        while let Some(record) = remaining.next() {
            if self.write(&record).await {
                flushed += 1;
                continue;
            }
            let mut pending = self.pending.lock();
            for record in std::iter::once(record).chain(remaining.by_ref()).rev() {
                pending.push_front(record);
            }
            while pending.len() > self.config.pending_capacity {
                pending.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            break;
        }

        tracing::info!(flushed, pending = self.pending_count(), "Flushed pending audit records");
        flushed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Records discarded because the pending buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn detect_intrusions(&self, tenant_id: &TenantId) -> SecurityResult<Vec<SecurityThreat>> {
        self.detect_intrusions_at(tenant_id, Utc::now()).await
    }

    /// Run the heuristics over the window ending at `now`.
    ///
    /// A pattern that already has an open threat detected inside the window
    /// returns that threat instead of a new one.
    pub async fn detect_intrusions_at(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> SecurityResult<Vec<SecurityThreat>> {
        let window_start = now - Duration::minutes(i64::from(self.detection.window_minutes));
        let events = self.store.events_between(tenant_id, window_start, now).await?;
        let open: Vec<SecurityThreat> = self
            .store
            .threats(tenant_id, None)
            .await?
            .into_iter()
            .filter(|t| t.status.is_open() && t.detected_at >= window_start)
            .collect();

        let mut result = Vec::new();
        for candidate in detection::detect(tenant_id, &events, &self.detection, now) {
            match open.iter().find(|t| t.same_pattern(&candidate)) {
                Some(existing) => result.push(existing.clone()),
                None => {
                    self.log_security_threat(candidate.clone()).await;
                    result.push(candidate);
                }
            }
        }
        Ok(result)
    }

    pub async fn get_current_metrics(&self, tenant_id: &TenantId) -> SecurityResult<Metrics> {
        self.get_current_metrics_at(tenant_id, Utc::now()).await
    }

    pub async fn get_current_metrics_at(&self, tenant_id: &TenantId, now: DateTime<Utc>) -> SecurityResult<Metrics> {
        let since = now - Duration::minutes(i64::from(self.config.metrics_window_minutes));
        let events = self.store.events_between(tenant_id, since, now).await?;
        let threats: Vec<SecurityThreat> = self
            .store
            .threats(tenant_id, None)
            .await?
            .into_iter()
            .filter(|t| t.detected_at >= since && t.detected_at <= now)
            .collect();
        Ok(report::build_metrics(&events, &threats))
    }

    pub async fn generate_audit_report(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SecurityResult<AuditReport> {
        if start > end {
            return Err(SecurityError::InvalidInput(format!(
                "report period start {} is after end {}",
                start, end
            )));
        }
        let events = self.store.events_between(tenant_id, start, end).await?;
        let threats: Vec<SecurityThreat> = self
            .store
            .threats(tenant_id, None)
            .await?
            .into_iter()
            .filter(|t| t.detected_at >= start && t.detected_at <= end)
            .collect();
        Ok(report::build_report(tenant_id, start, end, &events, threats))
    }

    pub async fn cleanup_old_logs(&self) -> SecurityResult<CleanupSummary> {
        self.cleanup_old_logs_at(Utc::now()).await
    }

    /// Remove events and resolved threats older than the retention horizon.
    pub async fn cleanup_old_logs_at(&self, now: DateTime<Utc>) -> SecurityResult<CleanupSummary> {
        let cutoff = self.retention_cutoff(now);
        let mut summary = CleanupSummary::default();
        for tenant_id in self.store.tenants().await? {
            summary.events_removed += self.store.purge_events_before(&tenant_id, cutoff).await?;
            summary.threats_removed += self.store.purge_resolved_threats_before(&tenant_id, cutoff).await?;
            summary.tenants += 1;
        }
        tracing::info!(
            events = summary.events_removed,
            threats = summary.threats_removed,
            cutoff = %cutoff,
            "Audit retention sweep complete"
        );
        Ok(summary)
    }

    /// Move a threat along its lifecycle
    pub async fn update_threat_status(
        &self,
        tenant_id: &TenantId,
        threat_id: &str,
        status: ThreatStatus,
    ) -> SecurityResult<SecurityThreat> {
        let mut threat = self
            .store
            .threats(tenant_id, None)
            .await?
            .into_iter()
            .find(|t| t.id == threat_id)
            .ok_or_else(|| SecurityError::ThreatNotFound(threat_id.to_string()))?;

        let from = threat.status;
        threat.transition(status, Utc::now())?;
        match self.store.update_threat(threat.clone(), from).await {
            Ok(()) => {}
            // Another caller moved the threat first
            Err(StoreError::Conflict(_)) => {
                return Err(SecurityError::InvalidThreatTransition {
                    from: from.as_str().into(),
                    to: status.as_str().into(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(
            tenant_id = %tenant_id,
            threat_id,
            from = from.as_str(),
            to = status.as_str(),
            "Threat status updated"
        );
        Ok(threat)
    }

    pub async fn list_threats(
        &self,
        tenant_id: &TenantId,
        status: Option<ThreatStatus>,
    ) -> SecurityResult<Vec<SecurityThreat>> {
        Ok(self.store.threats(tenant_id, status).await?)
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.config.retention_days))
    }

    #[cfg(test)]
    pub(crate) async fn events_between(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SecurityResult<Vec<AuditEvent>> {
        Ok(self.store.events_between(tenant_id, start, end).await?)
    }

    async fn write(&self, record: &PendingRecord) -> bool {
        let timeout = self.config.append_timeout();
        let result = match record {
            PendingRecord::Event(event) => tokio::time::timeout(timeout, self.store.append_event(event.clone())).await,
            PendingRecord::Threat(threat) => {
                tokio::time::timeout(timeout, self.store.append_threat(threat.clone())).await
            }
        };
        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Audit store write failed");
                false
            }
            Err(_) => {
                tracing::error!(timeout_ms = self.config.append_timeout_ms, "Audit store write timed out");
                false
            }
        }
    }

    fn park(&self, record: PendingRecord) {
        let mut pending = self.pending.lock();
        if self.config.pending_capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if pending.len() >= self.config.pending_capacity {
            pending.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(capacity = self.config.pending_capacity, "Pending audit buffer full, dropped oldest record");
        }
        pending.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::test_support::FaultyAuditStore;
    use crate::store::StoreResult;
    use async_trait::async_trait;
    use lexguard_common::ErrorCode;

    fn trail() -> AuditTrail {
        AuditTrail::new(
            Arc::new(InMemoryAuditStore::new()),
            AuditConfig::default(),
            DetectionConfig::default(),
        )
    }

    fn failed_login(tenant: &TenantId, at: DateTime<Utc>) -> AuditEvent {
        AuditEvent::new(tenant.clone(), ActionType::Login)
            .user("u1")
            .failed(ErrorCode::InvalidCredentials, "bad password")
            .at(at)
    }

    #[tokio::test]
    async fn test_log_event_assigns_id() {
        let trail = trail();
        let tenant = TenantId::new("t1");
        let id = trail.log_event(AuditEvent::new(tenant.clone(), ActionType::Read)).await;
        assert!(!id.is_empty());

        let now = Utc::now();
        let events = trail.events_between(&tenant, now - Duration::minutes(1), now).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
    }

    #[tokio::test]
    async fn test_event_without_tenant_is_kept() {
        let trail = trail();
        trail.log_event(AuditEvent::new(TenantId::new(""), ActionType::Login)).await;

        let now = Utc::now();
        let events = trail
            .events_between(&TenantId::new(UNSCOPED_TENANT), now - Duration::minutes(1), now)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_brute_force_detected_once() {
        let trail = trail();
        let tenant = TenantId::new("t1");
        let now = Utc::now();
        for _ in 0..6 {
            trail.log_event(failed_login(&tenant, now)).await;
        }

        let first = trail.detect_intrusions_at(&tenant, now).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].threat_type, ThreatType::BruteForceLogin);

        let second = trail.detect_intrusions_at(&tenant, now).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(trail.list_threats(&tenant, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_old_failures_fall_out_of_window() {
        let trail = trail();
        let tenant = TenantId::new("t1");
        let now = Utc::now();
        for _ in 0..6 {
            trail.log_event(failed_login(&tenant, now - Duration::hours(2))).await;
        }
        assert!(trail.detect_intrusions_at(&tenant, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_period_validation() {
        let trail = trail();
        let now = Utc::now();
        let result = trail
            .generate_audit_report(&TenantId::new("t1"), now, now - Duration::days(1))
            .await;
        assert!(matches!(result, Err(SecurityError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_threat_status_transitions() {
        let trail = trail();
        let tenant = TenantId::new("t1");
        let threat = SecurityThreat::new(tenant.clone(), ThreatType::SuspiciousActivity, Severity::Medium, "x");
        let id = trail.log_security_threat(threat).await;

        let updated = trail.update_threat_status(&tenant, &id, ThreatStatus::Investigating).await.unwrap();
        assert_eq!(updated.status, ThreatStatus::Investigating);
        trail.update_threat_status(&tenant, &id, ThreatStatus::Resolved).await.unwrap();

        assert!(matches!(
            trail.update_threat_status(&tenant, &id, ThreatStatus::Investigating).await,
            Err(SecurityError::InvalidThreatTransition { .. })
        ));
        assert!(matches!(
            trail.update_threat_status(&TenantId::new("t2"), &id, ThreatStatus::Resolved).await,
            Err(SecurityError::ThreatNotFound(_))
        ));
        assert_eq!(trail.list_threats(&tenant, Some(ThreatStatus::Resolved)).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_apply_once() {
        let trail = Arc::new(trail());
        let tenant = TenantId::new("t1");

        for _ in 0..8 {
            let threat = SecurityThreat::new(tenant.clone(), ThreatType::SuspiciousActivity, Severity::Medium, "x");
            let id = trail.log_security_threat(threat).await;

            let mut handles = Vec::new();
            for _ in 0..2 {
                let trail = trail.clone();
                let tenant = tenant.clone();
                let id = id.clone();
                handles.push(tokio::spawn(async move {
                    trail.update_threat_status(&tenant, &id, ThreatStatus::Resolved).await
                }));
            }

            let mut applied = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => applied += 1,
                    Err(e) => assert!(matches!(e, SecurityError::InvalidThreatTransition { .. })),
                }
            }
            assert_eq!(applied, 1);
        }
    }

    #[tokio::test]
    async fn test_retention_keeps_open_threats() {
        let trail = trail();
        let tenant = TenantId::new("t1");
        let now = Utc::now();
        let ancient = now - Duration::days(2000);

        trail.log_event(AuditEvent::new(tenant.clone(), ActionType::Read).at(ancient)).await;
        trail.log_event(AuditEvent::new(tenant.clone(), ActionType::Read).at(now)).await;
        let open = SecurityThreat::new(tenant.clone(), ThreatType::BruteForceLogin, Severity::High, "old")
            .detected_at(ancient);
        trail.log_security_threat(open).await;

        let summary = trail.cleanup_old_logs_at(now).await.unwrap();
        assert_eq!(summary.events_removed, 1);
        assert_eq!(summary.threats_removed, 0);
        assert_eq!(trail.list_threats(&tenant, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_store_parks_and_replays() {
        let store = Arc::new(FaultyAuditStore::offline());
        let trail = AuditTrail::new(
            store.clone(),
            AuditConfig { pending_capacity: 2, ..Default::default() },
            DetectionConfig::default(),
        );
        let tenant = TenantId::new("t1");

        for _ in 0..3 {
            trail.log_event(AuditEvent::new(tenant.clone(), ActionType::Read)).await;
        }
        assert_eq!(trail.pending_count(), 2);
        assert_eq!(trail.dropped_count(), 1);

        assert_eq!(trail.flush_pending().await, 0);
        assert_eq!(trail.pending_count(), 2);

        store.set_down(false);
        assert_eq!(trail.flush_pending().await, 2);
        assert_eq!(trail.pending_count(), 0);

        let now = Utc::now();
        let events = store.inner.events_between(&tenant, now - Duration::minutes(1), now).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_slow_tenant_does_not_block_others() {
        let store = Arc::new(FaultyAuditStore::default());
        let trail = Arc::new(AuditTrail::new(
            store.clone(),
            AuditConfig { append_timeout_ms: 30_000, ..Default::default() },
            DetectionConfig::default(),
        ));
        let slow = TenantId::new("t1");
        let fast = TenantId::new("t2");
        store.hold(&slow);

        let pending = {
            let trail = trail.clone();
            let slow = slow.clone();
            tokio::spawn(async move { trail.log_event(AuditEvent::new(slow, ActionType::Read)).await })
        };
        tokio::task::yield_now().await;

        let logged = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            trail.log_event(AuditEvent::new(fast.clone(), ActionType::Read)),
        )
        .await;
        assert!(logged.is_ok());

        let now = Utc::now();
        let window = now - Duration::minutes(1);
        assert_eq!(store.inner.events_between(&fast, window, now).await.unwrap().len(), 1);
        assert!(store.inner.events_between(&slow, window, Utc::now()).await.unwrap().is_empty());

        store.release();
        pending.await.unwrap();
        assert_eq!(store.inner.events_between(&slow, window, Utc::now()).await.unwrap().len(), 1);
        assert_eq!(trail.pending_count(), 0);
    }

    /// Store whose appends never complete in time
    struct StalledStore(InMemoryAuditStore);

    #[async_trait]
    impl AuditStore for StalledStore {
        async fn append_event(&self, _event: AuditEvent) -> StoreResult<()> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn events_between(
            &self,
            tenant_id: &TenantId,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> StoreResult<Vec<AuditEvent>> {
            self.0.events_between(tenant_id, start, end).await
        }
        async fn append_threat(&self, threat: SecurityThreat) -> StoreResult<()> {
            self.0.append_threat(threat).await
        }
        async fn threats(&self, tenant_id: &TenantId, status: Option<ThreatStatus>) -> StoreResult<Vec<SecurityThreat>> {
            self.0.threats(tenant_id, status).await
        }
        async fn update_threat(&self, threat: SecurityThreat, expected: ThreatStatus) -> StoreResult<()> {
            self.0.update_threat(threat, expected).await
        }
        async fn purge_events_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
            self.0.purge_events_before(tenant_id, cutoff).await
        }
        async fn purge_resolved_threats_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
            self.0.purge_resolved_threats_before(tenant_id, cutoff).await
        }
        async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
            self.0.tenants().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_does_not_block_caller() {
        let trail = AuditTrail::new(
            Arc::new(StalledStore(InMemoryAuditStore::new())),
            AuditConfig::default(),
            DetectionConfig::default(),
        );
        let id = trail.log_event(AuditEvent::new(TenantId::new("t1"), ActionType::Read)).await;
        assert!(!id.is_empty());
        assert_eq!(trail.pending_count(), 1);
    }
}
