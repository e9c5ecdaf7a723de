//! Represents an object stored in a bucket and its lifecycle bookkeeping.

use super::from_unix;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of an object that still has a catalog record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    /// Accepted locally and submitted for upload, remote durability unconfirmed.
    Queued,
    /// The remote network has confirmed the object is retrievable.
    Durable,
}

/// Metadata for a single object.
///
/// This never describes whether the bytes are currently in the local cache;
/// a durable object may have been evicted and is re-downloaded on demand.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Name of the bucket the object lives in.
    pub bucket: String,

    /// Object name, unique within its bucket.
    pub name: String,

    /// Size in bytes.
    pub size: i64,

    /// When the object was queued for upload.
    pub queued: DateTime<Utc>,

    /// When the remote network confirmed durability. `None` while queued.
    pub uploaded: Option<DateTime<Utc>>,

    /// Seconds of upload/fetch inactivity before the cached copy may be
    /// evicted. `0` keeps the object cached forever.
    pub purge_after: i64,

    /// Number of fetches served from the local cache.
    pub cached_fetches: i64,

    /// Number of fetches that required a download from the remote network.
    pub sia_fetches: i64,

    /// Time of the most recent fetch, if any.
    pub last_fetch: Option<DateTime<Utc>>,
}

impl ObjectInfo {
    /// Key under which the object is known to the remote network.
    pub fn remote_key(&self) -> String {
        remote_key(&self.bucket, &self.name)
    }

    pub fn is_durable(&self) -> bool {
        self.uploaded.is_some()
    }

    pub fn state(&self) -> ObjectState {
        if self.is_durable() {
            ObjectState::Durable
        } else {
            ObjectState::Queued
        }
    }

    /// Whether the cached copy may be dropped at `now`.
    ///
    /// Only durable objects with a non-zero purge window qualify, and only
    /// once both the upload and the last fetch are older than the window.
    /// An object that was never fetched uses its upload time for recency.
    pub fn is_evictable(&self, now: DateTime<Utc>) -> bool {
        if self.purge_after <= 0 {
            return false;
        }
        let Some(uploaded) = self.uploaded else {
            return false;
        };
        let last_touch = self.last_fetch.unwrap_or(uploaded);
        let since_upload = (now - uploaded).num_seconds();
        let since_fetch = (now - last_touch).num_seconds();
        since_upload > self.purge_after && since_fetch > self.purge_after
    }
}

/// Build the remote key for `(bucket, name)`.
pub fn remote_key(bucket: &str, name: &str) -> String {
    format!("{}/{}", bucket, name)
}

/// Raw `objects` row.
#[derive(FromRow, Debug)]
pub(crate) struct ObjectRow {
    pub bucket: String,
    pub name: String,
    pub size: i64,
    pub queued: i64,
    pub uploaded: i64,
    pub purge_after: i64,
    pub cached_fetches: i64,
    pub sia_fetches: i64,
    pub last_fetch: i64,
}

impl From<ObjectRow> for ObjectInfo {
    fn from(row: ObjectRow) -> Self {
        Self {
            bucket: row.bucket,
            name: row.name,
            size: row.size,
            queued: from_unix(row.queued).unwrap_or_default(),
            uploaded: from_unix(row.uploaded),
            purge_after: row.purge_after,
            cached_fetches: row.cached_fetches,
            sia_fetches: row.sia_fetches,
            last_fetch: from_unix(row.last_fetch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NOT_YET;
    use chrono::Duration;

    const T0: i64 = 1_700_000_000;

    fn queued_row(secs: i64) -> ObjectRow {
        ObjectRow {
            bucket: "photos".into(),
            name: "cat.jpg".into(),
            size: 3,
            queued: secs,
            uploaded: NOT_YET,
            purge_after: 10,
            cached_fetches: 0,
            sia_fetches: 0,
            last_fetch: NOT_YET,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn sentinel_columns_map_to_none() {
        let info = ObjectInfo::from(queued_row(T0));
        assert_eq!(info.queued, at(T0));
        assert_eq!(info.uploaded, None);
        assert_eq!(info.last_fetch, None);
        assert_eq!(info.state(), ObjectState::Queued);
        assert_eq!(info.remote_key(), "photos/cat.jpg");
    }

    #[test]
    fn queued_objects_are_never_evictable() {
        let info = ObjectInfo::from(queued_row(T0));
        assert!(!info.is_evictable(at(T0) + Duration::days(30)));
    }

    #[test]
    fn eviction_requires_both_windows_to_lapse() {
        let mut row = queued_row(T0);
        row.uploaded = T0;
        let info = ObjectInfo::from(row);
        assert!(!info.is_evictable(at(T0 + 10)));
        assert!(info.is_evictable(at(T0 + 11)));

        let recently_fetched = ObjectInfo {
            last_fetch: Some(at(T0 + 5)),
            ..info.clone()
        };
        assert!(!recently_fetched.is_evictable(at(T0 + 11)));
        assert!(recently_fetched.is_evictable(at(T0 + 16)));
    }

    #[test]
    fn zero_purge_window_keeps_object_cached() {
        let mut row = queued_row(T0);
        row.uploaded = T0;
        row.purge_after = 0;
        let info = ObjectInfo::from(row);
        assert!(!info.is_evictable(at(T0) + Duration::days(365)));
    }
}
