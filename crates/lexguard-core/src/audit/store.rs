//! Audit store - append-only event log and threat register
//!
//! Logical tables: events by id with a `(tenant_id, timestamp)` index,
//! threats by id with a `(tenant_id, status)` index.

use super::model::{AuditEvent, SecurityThreat, ThreatStatus};
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lexguard_common::TenantId;

/// Audit store trait
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_event(&self, event: AuditEvent) -> StoreResult<()>;

    /// Events with `start <= timestamp <= end`, oldest first
    async fn events_between(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<AuditEvent>>;

    async fn append_threat(&self, threat: SecurityThreat) -> StoreResult<()>;

    async fn threats(&self, tenant_id: &TenantId, status: Option<ThreatStatus>) -> StoreResult<Vec<SecurityThreat>>;

    /// Replace a stored threat with the same id and tenant, provided its
    /// stored status is still `expected`. `Conflict` otherwise.
    async fn update_threat(&self, threat: SecurityThreat, expected: ThreatStatus) -> StoreResult<()>;

    /// Returns the number of events removed
    async fn purge_events_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Drop resolved threats last updated before `cutoff`
    async fn purge_resolved_threats_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Tenants with at least one event or threat
    async fn tenants(&self) -> StoreResult<Vec<TenantId>>;
}

/// In-memory audit store, one shard per tenant
pub struct InMemoryAuditStore {
    events: DashMap<TenantId, Vec<AuditEvent>>,
    threats: DashMap<TenantId, Vec<SecurityThreat>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            threats: DashMap::new(),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append_event(&self, event: AuditEvent) -> StoreResult<()> {
        let mut log = self.events.entry(event.tenant_id.clone()).or_default();
        // Equal timestamps keep arrival order.
        if log.last().map_or(true, |last| last.timestamp <= event.timestamp) {
            log.push(event);
        } else {
            let at = log.partition_point(|e| e.timestamp <= event.timestamp);
            log.insert(at, event);
        }
        Ok(())
    }

    async fn events_between(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<AuditEvent>> {
        Ok(self
            .events
            .get(tenant_id)
            .map(|log| {
                let from = log.partition_point(|e| e.timestamp < start);
                let to = log.partition_point(|e| e.timestamp <= end);
                if from < to {
                    log[from..to].to_vec()
                } else {
                    Vec::new()
                }
            })
            .unwrap_or_default())
    }

    async fn append_threat(&self, threat: SecurityThreat) -> StoreResult<()> {
        self.threats.entry(threat.tenant_id.clone()).or_default().push(threat);
        Ok(())
    }

    async fn threats(&self, tenant_id: &TenantId, status: Option<ThreatStatus>) -> StoreResult<Vec<SecurityThreat>> {
        Ok(self
            .threats
            .get(tenant_id)
            .map(|list| {
                list.iter()
                    .filter(|t| status.map_or(true, |s| t.status == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_threat(&self, threat: SecurityThreat, expected: ThreatStatus) -> StoreResult<()> {
        let mut list = self
            .threats
            .get_mut(&threat.tenant_id)
            .ok_or_else(|| StoreError::NotFound(threat.id.clone()))?;
        let slot = list
            .iter_mut()
            .find(|t| t.id == threat.id)
            .ok_or_else(|| StoreError::NotFound(threat.id.clone()))?;
        if slot.status != expected {
            return Err(StoreError::Conflict(format!(
                "threat {} is {}, expected {}",
                threat.id,
                slot.status.as_str(),
                expected.as_str()
            )));
        }
        *slot = threat;
        Ok(())
    }

    async fn purge_events_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        Ok(match self.events.get_mut(tenant_id) {
            Some(mut log) => {
                let n = log.partition_point(|e| e.timestamp < cutoff);
                log.drain(..n);
                n
            }
            None => 0,
        })
    }

    async fn purge_resolved_threats_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        Ok(match self.threats.get_mut(tenant_id) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|t| t.status.is_open() || t.updated_at >= cutoff);
                before - list.len()
            }
            None => 0,
        })
    }

    async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
        let mut tenants: Vec<TenantId> = self
            .events
            .iter()
            .map(|r| r.key().clone())
            .chain(self.threats.iter().map(|r| r.key().clone()))
            .collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}

/// Stores for exercising failure handling
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// In-memory store that can fail every write, or hold one tenant's
    /// appends until released.
    #[derive(Default)]
    pub(crate) struct FaultyAuditStore {
        pub(crate) inner: InMemoryAuditStore,
        down: AtomicBool,
        held: Mutex<Option<TenantId>>,
        release: Notify,
    }

    impl FaultyAuditStore {
        pub(crate) fn offline() -> Self {
            let store = Self::default();
            store.set_down(true);
            store
        }

        pub(crate) fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        pub(crate) fn hold(&self, tenant_id: &TenantId) {
            *self.held.lock() = Some(tenant_id.clone());
        }

        pub(crate) fn release(&self) {
            *self.held.lock() = None;
            self.release.notify_waiters();
        }

        fn check(&self) -> StoreResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("database offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AuditStore for FaultyAuditStore {
        async fn append_event(&self, event: AuditEvent) -> StoreResult<()> {
            self.check()?;
            loop {
                let released = self.release.notified();
                let held = self.held.lock().as_ref() == Some(&event.tenant_id);
                if !held {
                    break;
                }
                released.await;
            }
            self.inner.append_event(event).await
        }
        async fn events_between(
            &self,
            tenant_id: &TenantId,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> StoreResult<Vec<AuditEvent>> {
            self.inner.events_between(tenant_id, start, end).await
        }
        async fn append_threat(&self, threat: SecurityThreat) -> StoreResult<()> {
            self.check()?;
            self.inner.append_threat(threat).await
        }
        async fn threats(&self, tenant_id: &TenantId, status: Option<ThreatStatus>) -> StoreResult<Vec<SecurityThreat>> {
            self.inner.threats(tenant_id, status).await
        }
        async fn update_threat(&self, threat: SecurityThreat, expected: ThreatStatus) -> StoreResult<()> {
            self.inner.update_threat(threat, expected).await
        }
        async fn purge_events_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
            self.inner.purge_events_before(tenant_id, cutoff).await
        }
        async fn purge_resolved_threats_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> StoreResult<usize> {
            self.inner.purge_resolved_threats_before(tenant_id, cutoff).await
        }
        async fn tenants(&self) -> StoreResult<Vec<TenantId>> {
            self.inner.tenants().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::model::{ActionType, Severity, ThreatType};
    use chrono::Duration;

    #[tokio::test]
    async fn test_equal_timestamps_keep_arrival_order() {
        let store = InMemoryAuditStore::new();
        let tenant = TenantId::new("t1");
        let at = Utc::now();

        for id in ["e0", "e1", "e2"] {
            let mut event = AuditEvent::new(tenant.clone(), ActionType::Read).at(at);
            event.id = id.to_string();
            store.append_event(event).await.unwrap();
        }
        let late = AuditEvent::new(tenant.clone(), ActionType::Read).at(at - Duration::seconds(1));
        store.append_event(late).await.unwrap();

        let events = store.events_between(&tenant, at - Duration::seconds(5), at).await.unwrap();
        assert_eq!(events.len(), 4);
        assert!(events[0].timestamp < at);
        let order: Vec<&str> = events[1..].iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["e0", "e1", "e2"]);
    }

    #[tokio::test]
    async fn test_update_threat_rejects_stale_status() {
        let store = InMemoryAuditStore::new();
        let tenant = TenantId::new("t1");
        let threat = SecurityThreat::new(tenant.clone(), ThreatType::SuspiciousActivity, Severity::Medium, "x");
        store.append_threat(threat.clone()).await.unwrap();

        let mut investigating = threat.clone();
        investigating.transition(ThreatStatus::Investigating, Utc::now()).unwrap();
        store.update_threat(investigating, ThreatStatus::Detected).await.unwrap();

        let mut resolved = threat;
        resolved.transition(ThreatStatus::Resolved, Utc::now()).unwrap();
        assert!(matches!(
            store.update_threat(resolved, ThreatStatus::Detected).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(
            store.threats(&tenant, None).await.unwrap()[0].status,
            ThreatStatus::Investigating
        );
    }

    #[tokio::test]
    async fn test_events_kept_in_time_order() {
        let store = InMemoryAuditStore::new();
        let tenant = TenantId::new("t1");
        let base = Utc::now();

        for offset in [5, 1, 3] {
            let event = AuditEvent::new(tenant.clone(), ActionType::Read).at(base + Duration::seconds(offset));
            store.append_event(event).await.unwrap();
        }

        let events = store
            .events_between(&tenant, base + Duration::seconds(1), base + Duration::seconds(3))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp < events[1].timestamp);
    }

    #[tokio::test]
    async fn test_tenants_do_not_mix() {
        let store = InMemoryAuditStore::new();
        let now = Utc::now();
        store
            .append_event(AuditEvent::new(TenantId::new("t1"), ActionType::Login).at(now))
            .await
            .unwrap();

        let other = store
            .events_between(&TenantId::new("t2"), now - Duration::hours(1), now)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_open_threats() {
        let store = InMemoryAuditStore::new();
        let tenant = TenantId::new("t1");
        let old = Utc::now() - Duration::days(4000);

        let open = SecurityThreat::new(tenant.clone(), ThreatType::BruteForceLogin, Severity::High, "open")
            .detected_at(old);
        let mut resolved = SecurityThreat::new(tenant.clone(), ThreatType::BruteForceLogin, Severity::High, "done")
            .detected_at(old);
        resolved.transition(ThreatStatus::Resolved, old).unwrap();

        store.append_threat(open.clone()).await.unwrap();
        store.append_threat(resolved).await.unwrap();

        let removed = store.purge_resolved_threats_before(&tenant, Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.threats(&tenant, None).await.unwrap(), vec![open]);
    }
}
