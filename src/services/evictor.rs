//! Drops cached copies of durable objects whose purge window has lapsed.
//! Catalog records are never touched here.

use super::{cache::CacheStore, catalog::Catalog};
use crate::errors::BridgeResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvictReport {
    /// Objects examined across all buckets.
    pub scanned: usize,
    /// Cached files removed by this pass.
    pub evicted: usize,
    /// Buckets or files that could not be processed.
    pub failed: usize,
}

/// Run one eviction pass against the state of the world at `now`.
///
/// Only the bucket listing failing aborts the pass; per-bucket and per-file
/// failures are logged and counted.
pub async fn evict(
    catalog: &Catalog,
    cache: &CacheStore,
    now: DateTime<Utc>,
) -> BridgeResult<EvictReport> {
    let mut report = EvictReport::default();

    for bucket in catalog.list_buckets().await? {
        let objects = match catalog.list_objects(&bucket.name).await {
            Ok(objects) => objects,
            Err(err) => {
                warn!("failed to list objects in bucket {}: {}", bucket.name, err);
                report.failed += 1;
                continue;
            }
        };

        for object in objects {
            report.scanned += 1;
            if !object.is_evictable(now) {
                continue;
            }
            match cache.remove(&object.bucket, &object.name).await {
                Ok(true) => {
                    debug!("evicted {} from cache", object.remote_key());
                    report.evicted += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!("failed to evict {}: {}", object.remote_key(), err);
                    report.failed += 1;
                }
            }
        }
    }

    if report.evicted > 0 {
        info!("Evicted {} cached objects", report.evicted);
    }
    Ok(report)
}
