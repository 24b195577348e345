// SPDX-License-Identifier: GPL-3.0-only

//! Startup reconciliation of persisted mounts
//!
//! At most one mount is in the foreground at a time. The first persisted
//! record whose network path still answers becomes that mount; every other
//! record is deleted, reachable or not, so stored state never outlives its
//! backing by more than one pass.

use std::sync::Arc;
use std::time::Duration;

use bridge_contracts::{BridgeError, MountStore, PathProbe};
use bridge_sys::probe::probe_within;
use bridge_types::{ActiveMount, MountIdentity};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub identity: MountIdentity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// The mount the rest of the application operates on
    pub restored: Option<ActiveMount>,
    pub removed: Vec<MountIdentity>,
    /// Records that should have been removed or refreshed but could not be
    pub failures: Vec<ReconcileFailure>,
    /// The pass stopped early; unvisited records are untouched
    pub cancelled: bool,
}

pub struct Reconciler {
    store: Arc<dyn MountStore>,
    probe: Arc<dyn PathProbe>,
    probe_timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MountStore>, probe: Arc<dyn PathProbe>, probe_timeout: Duration) -> Self {
        Self {
            store,
            probe,
            probe_timeout,
        }
    }

    /// Only a failure to read the store is an error; everything else lands
    /// in the report.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<ReconcileReport, BridgeError> {
        let records = self.store.list().await?;
        info!("Reconciling {} persisted mount(s)", records.len());

        let mut report = ReconcileReport::default();
        'records: for mut record in records {
            if cancel.is_cancelled() {
                warn!("Reconciliation cancelled");
                report.cancelled = true;
                break 'records;
            }

            let identity = record.identity;
            if report.restored.is_none() {
                let reachable = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break 'records;
                    }
                    reachable = probe_within(self.probe.as_ref(), &record.unc_path, self.probe_timeout) => reachable,
                };

                if reachable {
                    record.mark_verified(true);
                    if let Err(e) = self.store.upsert(record.clone()).await {
                        warn!("Could not refresh {}: {}", identity, e);
                        report.failures.push(ReconcileFailure {
                            identity,
                            message: e.to_string(),
                        });
                    }
                    info!("Restored {} at {}", identity, record.browse_path());
                    report.restored = Some(record);
                    continue;
                }
                debug!("{} is unreachable at {}", identity, record.unc_path);
            }

            match self.store.remove(identity).await {
                Ok(_) => {
                    info!("Removed stale record {}", identity);
                    report.removed.push(identity);
                }
                Err(e) => {
                    warn!("Could not remove stale record {}: {}", identity, e);
                    report.failures.push(ReconcileFailure {
                        identity,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}
