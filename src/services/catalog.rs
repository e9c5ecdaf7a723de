//! src/services/catalog.rs
//!
//! Catalog: persisted record of every bucket and object, backed by SQLite.
//! Each mutation is a single statement (or, for bucket deletion, a single
//! transaction), so concurrent callers never observe a half-applied change
//! to one `(bucket, name)` key.

use crate::{
    errors::{BridgeError, BridgeResult},
    models::{
        NOT_YET,
        bucket::{BucketInfo, BucketRow},
        object::{ObjectInfo, ObjectRow},
    },
};
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const OBJECT_COLUMNS: &str = "bucket, name, size, queued, uploaded, purge_after, \
                              cached_fetches, sia_fetches, last_fetch";

/// Handle to the metadata database. Cloning shares the underlying pool.
#[derive(Clone, Debug)]
pub struct Catalog {
    db: Arc<SqlitePool>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if missing) the SQLite database at `database_url`.
    pub async fn connect(database_url: &str) -> BridgeResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Ensure the schema exists. Safe to run on every startup.
    pub async fn migrate(&self) -> BridgeResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            debug!("Executing schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Cheap connectivity probe.
    pub async fn ping(&self) -> BridgeResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Insert a bucket unless it already exists. Returns whether a row was created.
    pub async fn create_bucket(&self, name: &str, created: DateTime<Utc>) -> BridgeResult<bool> {
        let result = sqlx::query(
            "INSERT INTO buckets (name, created) VALUES (?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(created.timestamp())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn bucket_exists(&self, name: &str) -> BridgeResult<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM buckets WHERE name = ?")
            .bind(name)
            .fetch_optional(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    pub async fn get_bucket(&self, name: &str) -> BridgeResult<BucketInfo> {
        sqlx::query_as::<_, BucketRow>("SELECT name, created FROM buckets WHERE name = ?")
            .bind(name)
            .fetch_one(&*self.db)
            .await
            .map(BucketInfo::from)
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => BridgeError::BucketNotFound(name.to_string()),
                other => BridgeError::Persistence(other),
            })
    }

    pub async fn list_buckets(&self) -> BridgeResult<Vec<BucketInfo>> {
        let rows = sqlx::query_as::<_, BucketRow>("SELECT name, created FROM buckets ORDER BY name")
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(BucketInfo::from).collect())
    }

    /// Delete a bucket together with every object record it holds.
    ///
    /// Returns the removed objects so the caller can clean up after them, or
    /// `BucketNotFound` if there was no such bucket.
    pub async fn delete_bucket(&self, name: &str) -> BridgeResult<Vec<ObjectInfo>> {
        let mut tx = self.db.begin().await?;

        let removed = sqlx::query_as::<_, ObjectRow>(&format!(
            "DELETE FROM objects WHERE bucket = ? RETURNING {}",
            OBJECT_COLUMNS
        ))
        .bind(name)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(BridgeError::BucketNotFound(name.to_string()));
        }

        tx.commit().await?;
        Ok(removed.into_iter().map(ObjectInfo::from).collect())
    }

    /// Insert a queued object record if, and only if, the key is free.
    ///
    /// Existence check and insert are one statement, so of several racing
    /// callers exactly one succeeds and the rest see `ObjectAlreadyExists`.
    pub async fn insert_object(
        &self,
        bucket: &str,
        name: &str,
        size: i64,
        queued: DateTime<Utc>,
        purge_after: i64,
    ) -> BridgeResult<()> {
        let result = sqlx::query(
            "INSERT INTO objects (bucket, name, size, queued, uploaded, purge_after,
                                  cached_fetches, sia_fetches, last_fetch)
             VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?)
             ON CONFLICT(bucket, name) DO NOTHING",
        )
        .bind(bucket)
        .bind(name)
        .bind(size)
        .bind(queued.timestamp())
        .bind(NOT_YET)
        .bind(purge_after)
        .bind(NOT_YET)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BridgeError::ObjectAlreadyExists {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub async fn object_exists(&self, bucket: &str, name: &str) -> BridgeResult<bool> {
        let found =
            sqlx::query_scalar::<_, i64>("SELECT 1 FROM objects WHERE bucket = ? AND name = ?")
                .bind(bucket)
                .bind(name)
                .fetch_optional(&*self.db)
                .await?;
        Ok(found.is_some())
    }

    pub async fn get_object(&self, bucket: &str, name: &str) -> BridgeResult<ObjectInfo> {
        sqlx::query_as::<_, ObjectRow>(&format!(
            "SELECT {} FROM objects WHERE bucket = ? AND name = ?",
            OBJECT_COLUMNS
        ))
        .bind(bucket)
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map(ObjectInfo::from)
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BridgeError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            },
            other => BridgeError::Persistence(other),
        })
    }

    /// All objects in `bucket`, ordered by name. Unknown buckets yield nothing.
    pub async fn list_objects(&self, bucket: &str) -> BridgeResult<Vec<ObjectInfo>> {
        let rows = sqlx::query_as::<_, ObjectRow>(&format!(
            "SELECT {} FROM objects WHERE bucket = ? ORDER BY name",
            OBJECT_COLUMNS
        ))
        .bind(bucket)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(ObjectInfo::from).collect())
    }

    /// Objects whose remote durability has not been confirmed yet.
    pub async fn list_pending_uploads(&self) -> BridgeResult<Vec<ObjectInfo>> {
        let rows = sqlx::query_as::<_, ObjectRow>(&format!(
            "SELECT {} FROM objects WHERE uploaded = ? ORDER BY queued, bucket, name",
            OBJECT_COLUMNS
        ))
        .bind(NOT_YET)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(ObjectInfo::from).collect())
    }

    /// Record remote durability. Only a still-queued record is updated, so the
    /// transition happens at most once; returns whether this call made it.
    pub async fn mark_uploaded(
        &self,
        bucket: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> BridgeResult<bool> {
        let result = sqlx::query(
            "UPDATE objects SET uploaded = ? WHERE bucket = ? AND name = ? AND uploaded = ?",
        )
        .bind(at.timestamp())
        .bind(bucket)
        .bind(name)
        .bind(NOT_YET)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Count a fetch served from the local cache.
    pub async fn record_cached_fetch(
        &self,
        bucket: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> BridgeResult<()> {
        self.record_fetch("cached_fetches", bucket, name, at).await
    }

    /// Count a fetch that had to be downloaded from the remote network.
    pub async fn record_remote_fetch(
        &self,
        bucket: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> BridgeResult<()> {
        self.record_fetch("sia_fetches", bucket, name, at).await
    }

    async fn record_fetch(
        &self,
        counter: &'static str,
        bucket: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> BridgeResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE objects SET {counter} = {counter} + 1, last_fetch = ?
             WHERE bucket = ? AND name = ?"
        ))
        .bind(at.timestamp())
        .bind(bucket)
        .bind(name)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BridgeError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Remove an object record. Returns whether a record existed.
    pub async fn delete_object(&self, bucket: &str, name: &str) -> BridgeResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND name = ?")
            .bind(bucket)
            .bind(name)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn catalog() -> (TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let catalog = Catalog::connect(&url).await.unwrap();
        catalog.migrate().await.unwrap();
        (dir, catalog)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let (_dir, catalog) = catalog().await;
        catalog.migrate().await.unwrap();
        catalog.ping().await.unwrap();
    }

    #[tokio::test]
    async fn create_bucket_only_inserts_once() {
        let (_dir, catalog) = catalog().await;
        assert!(catalog.create_bucket("media", at(100)).await.unwrap());
        assert!(!catalog.create_bucket("media", at(200)).await.unwrap());

        let buckets = catalog.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].created, at(100));
        assert!(catalog.bucket_exists("media").await.unwrap());
        assert!(matches!(
            catalog.get_bucket("other").await,
            Err(BridgeError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn insert_object_rejects_duplicates() {
        let (_dir, catalog) = catalog().await;
        catalog.create_bucket("media", at(1)).await.unwrap();
        catalog
            .insert_object("media", "a.bin", 4, at(10), 60)
            .await
            .unwrap();
        let err = catalog
            .insert_object("media", "a.bin", 9, at(11), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ObjectAlreadyExists { .. }));

        let info = catalog.get_object("media", "a.bin").await.unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(info.queued, at(10));
        assert_eq!(info.uploaded, None);
        assert_eq!(info.purge_after, 60);
        assert!(catalog.object_exists("media", "a.bin").await.unwrap());
    }

    #[tokio::test]
    async fn mark_uploaded_transitions_once() {
        let (_dir, catalog) = catalog().await;
        catalog.create_bucket("media", at(1)).await.unwrap();
        catalog
            .insert_object("media", "a.bin", 4, at(10), 60)
            .await
            .unwrap();
        assert_eq!(catalog.list_pending_uploads().await.unwrap().len(), 1);

        assert!(catalog.mark_uploaded("media", "a.bin", at(20)).await.unwrap());
        assert!(!catalog.mark_uploaded("media", "a.bin", at(30)).await.unwrap());

        let info = catalog.get_object("media", "a.bin").await.unwrap();
        assert_eq!(info.uploaded, Some(at(20)));
        assert!(catalog.list_pending_uploads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_counters_are_tracked_separately() {
        let (_dir, catalog) = catalog().await;
        catalog.create_bucket("media", at(1)).await.unwrap();
        catalog
            .insert_object("media", "a.bin", 4, at(10), 60)
            .await
            .unwrap();

        catalog
            .record_cached_fetch("media", "a.bin", at(40))
            .await
            .unwrap();
        catalog
            .record_cached_fetch("media", "a.bin", at(41))
            .await
            .unwrap();
        catalog
            .record_remote_fetch("media", "a.bin", at(50))
            .await
            .unwrap();

        let info = catalog.get_object("media", "a.bin").await.unwrap();
        assert_eq!(info.cached_fetches, 2);
        assert_eq!(info.sia_fetches, 1);
        assert_eq!(info.last_fetch, Some(at(50)));

        assert!(matches!(
            catalog.record_cached_fetch("media", "nope", at(60)).await,
            Err(BridgeError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_bucket_cascades_to_objects() {
        let (_dir, catalog) = catalog().await;
        catalog.create_bucket("media", at(1)).await.unwrap();
        catalog.create_bucket("keep", at(1)).await.unwrap();
        for name in ["a", "b"] {
            catalog
                .insert_object("media", name, 1, at(2), 0)
                .await
                .unwrap();
        }
        catalog.insert_object("keep", "a", 1, at(2), 0).await.unwrap();

        let removed = catalog.delete_bucket("media").await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(catalog.list_objects("media").await.unwrap().is_empty());
        assert!(!catalog.bucket_exists("media").await.unwrap());
        assert_eq!(catalog.list_objects("keep").await.unwrap().len(), 1);

        assert!(matches!(
            catalog.delete_bucket("media").await,
            Err(BridgeError::BucketNotFound(_))
        ));
    }
}
