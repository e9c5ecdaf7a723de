//! Promotes queued objects to durable once the remote network reports them available.

use super::{catalog::Catalog, remote::RemoteStorage};
use crate::errors::BridgeResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Queued objects examined.
    pub pending: usize,
    /// Objects marked durable by this pass.
    pub promoted: usize,
    /// Objects whose update failed; they stay queued for the next pass.
    pub failed: usize,
}

/// Run one reconciliation pass, stamping newly durable objects with `now`.
///
/// Listing pending objects or remote availability failing aborts the pass.
/// A failure to update a single object is logged and the pass moves on.
pub async fn reconcile(
    catalog: &Catalog,
    remote: &dyn RemoteStorage,
    now: DateTime<Utc>,
) -> BridgeResult<ReconcileReport> {
    let pending = catalog.list_pending_uploads().await?;
    let mut report = ReconcileReport {
        pending: pending.len(),
        ..Default::default()
    };
    if pending.is_empty() {
        return Ok(report);
    }

    let files = remote.list_availability().await?;
    let available: HashSet<&str> = files
        .iter()
        .filter(|f| f.available)
        .map(|f| f.object_key.as_str())
        .collect();

    for object in &pending {
        let key = object.remote_key();
        if !available.contains(key.as_str()) {
            continue;
        }
        match catalog.mark_uploaded(&object.bucket, &object.name, now).await {
            Ok(true) => {
                debug!("{} is now durable", key);
                report.promoted += 1;
            }
            // deleted or promoted concurrently
            Ok(false) => {}
            Err(err) => {
                warn!("failed to mark {} as uploaded: {}", key, err);
                report.failed += 1;
            }
        }
    }

    if report.promoted > 0 {
        info!(
            "Promoted {}/{} queued objects to durable",
            report.promoted, report.pending
        );
    }
    Ok(report)
}
