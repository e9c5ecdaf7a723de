//! Represents a logical bucket, a named container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bucket as exposed to callers.
///
/// Buckets are immutable once created; the only mutation is deletion,
/// which cascades to every object stored in them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    /// Unique bucket name.
    pub name: String,

    /// When this bucket was created.
    pub created: DateTime<Utc>,
}

/// Raw `buckets` row.
#[derive(FromRow, Debug)]
pub(crate) struct BucketRow {
    pub name: String,
    pub created: i64,
}

impl From<BucketRow> for BucketInfo {
    fn from(row: BucketRow) -> Self {
        Self {
            name: row.name,
            created: DateTime::from_timestamp(row.created, 0).unwrap_or_default(),
        }
    }
}
