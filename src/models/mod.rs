//! Core data models for the bridge.
//!
//! `BucketInfo` and `ObjectInfo` are what callers see. The `*Row` types map
//! one-to-one onto the SQLite tables via `sqlx::FromRow`, storing timestamps
//! as unix seconds with `0` standing in for "not yet".

pub mod bucket;
pub mod object;

use chrono::{DateTime, Utc};

/// Stored value for a timestamp that has not happened yet.
pub const NOT_YET: i64 = 0;

/// Convert stored unix seconds into a timestamp, treating the sentinel as `None`.
pub(crate) fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= NOT_YET {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

