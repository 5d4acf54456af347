//! Background maintenance: pending audit replay, scheduled key rotation and
//! retention sweeps.

use crate::audit::{AuditTrail, CleanupSummary};
use crate::keys::{KeyVault, TenantKey};
use lexguard_common::{SecurityError, SecurityResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Outcome of one maintenance cycle
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub flushed: usize,
    pub rotated: Vec<TenantKey>,
    pub cleanup: Option<CleanupSummary>,
}

/// Run one cycle.
pub async fn run_maintenance_cycle(vault: &KeyVault, audit: &AuditTrail) -> MaintenanceReport {
    let flushed = audit.flush_pending().await;
    let rotated = vault.rotate_due_keys().await;
    let cleanup = match audit.cleanup_old_logs().await {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::error!(error = %e, "Audit retention sweep failed");
            None
        }
    };

    tracing::debug!(flushed, rotated = rotated.len(), "Maintenance cycle complete");
    MaintenanceReport { flushed, rotated, cleanup }
}

/// Handle to the maintenance task
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the task and wait for it to finish its current cycle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Maintenance task ended abnormally");
        }
    }
}

/// Spawn the maintenance loop; the first cycle runs after one `interval`.
pub fn spawn_maintenance(
    vault: Arc<KeyVault>,
    audit: Arc<AuditTrail>,
    interval: Duration,
) -> SecurityResult<MaintenanceHandle> {
    if interval.is_zero() {
        return Err(SecurityError::InvalidInput("maintenance interval must be non-zero".into()));
    }
    let (shutdown, mut signal) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval() fires immediately; consume that tick
        ticker.tick().await;

        tracing::info!(interval_secs = interval.as_secs(), "Maintenance task started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_maintenance_cycle(&vault, &audit).await;
                }
                changed = signal.changed() => {
                    if changed.is_err() || *signal.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Maintenance task stopped");
    });

    Ok(MaintenanceHandle { shutdown, task })
}
