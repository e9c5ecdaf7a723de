//! Background cache/catalog management: every tick runs the reconciler and
//! then the evictor. Passes never overlap; a tick (or a manual call) that
//! arrives while a pass is still running is skipped.

use super::{
    cache::CacheStore,
    catalog::Catalog,
    evictor::{self, EvictReport},
    reconciler::{self, ReconcileReport},
    remote::RemoteStorage,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Outcome of one maintenance pass. A `None` half failed outright and was logged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub reconcile: Option<ReconcileReport>,
    pub evict: Option<EvictReport>,
}

#[derive(Clone)]
pub struct Manager {
    catalog: Catalog,
    cache: CacheStore,
    remote: Arc<dyn RemoteStorage>,
    running: Arc<AtomicBool>,
}

/// Clears the running flag however the pass ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Manager {
    pub fn new(catalog: Catalog, cache: CacheStore, remote: Arc<dyn RemoteStorage>) -> Self {
        Self {
            catalog,
            cache,
            remote,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run a single reconcile + evict pass as of `now`.
    ///
    /// Returns `None` without doing anything if another pass is in progress.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Option<MaintenanceReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("maintenance pass already running, skipping");
            return None;
        }
        let _guard = PassGuard(&self.running);

        let reconcile = match reconciler::reconcile(&self.catalog, self.remote.as_ref(), now).await
        {
            Ok(report) => Some(report),
            Err(err) => {
                error!("Error reconciling uploads: {}", err);
                None
            }
        };

        let evict = match evictor::evict(&self.catalog, &self.cache, now).await {
            Ok(report) => Some(report),
            Err(err) => {
                error!("Error purging cache: {}", err);
                None
            }
        };

        Some(MaintenanceReport { reconcile, evict })
    }

    /// Start the periodic loop. The first pass runs one `interval` from now.
    pub fn spawn(self, interval: Duration) -> ManagerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once(Utc::now()).await;
                    }
                }
            }
            debug!("maintenance loop stopped");
        });
        info!("Started maintenance loop every {:?}", interval);
        ManagerHandle { cancel, task }
    }
}

/// Running maintenance loop.
pub struct ManagerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    /// Stop the loop, waiting for an in-flight pass to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!("maintenance loop ended abnormally: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote::MemoryRemote;

    #[tokio::test]
    async fn overlapping_pass_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let catalog = Catalog::connect(&url).await.unwrap();
        catalog.migrate().await.unwrap();
        let manager = Manager::new(
            catalog,
            CacheStore::new(dir.path().join("cache")),
            Arc::new(MemoryRemote::new()),
        );

        manager.running.store(true, Ordering::SeqCst);
        assert!(manager.run_once(Utc::now()).await.is_none());

        manager.running.store(false, Ordering::SeqCst);
        let report = manager.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.reconcile, Some(ReconcileReport::default()));
        assert_eq!(report.evict, Some(EvictReport::default()));
        assert!(!manager.running.load(Ordering::SeqCst));
    }
}
