//! src/services/bridge.rs
//!
//! SiaBridge: buckets and objects on top of a slow, eventually-durable
//! remote network, with reads and writes served immediately from a local
//! cache. Every object moves through:
//!
//! - **Queued**: record inserted, bytes cached, upload submitted.
//! - **Durable**: the remote network confirmed availability (set by the
//!   background reconciler, never reverted).
//! - **Deleted**: record gone.
//!
//! The cached copy of a durable object may be evicted at any time; a later
//! read downloads it again. Queued objects are always served from cache.

use super::{
    cache::CacheStore,
    catalog::Catalog,
    manager::{MaintenanceReport, Manager, ManagerHandle},
    remote::{RemoteStorage, SiadClient},
};
use crate::{
    config::BridgeConfig,
    errors::{BridgeError, BridgeResult},
    models::{
        bucket::BucketInfo,
        object::{ObjectInfo, remote_key},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{io, path::Path, sync::Arc, time::Duration};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

const MAX_BUCKET_NAME_LEN: usize = 255;
const MAX_OBJECT_NAME_LEN: usize = 1024;

/// Where the bytes of a fetch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Cache,
    Remote,
}

/// Handle to one bridge instance. Cloning shares the same catalog, cache
/// and maintenance loop.
#[derive(Clone)]
pub struct SiaBridge {
    catalog: Catalog,
    cache: CacheStore,
    remote: Arc<dyn RemoteStorage>,
    manager: Manager,
    manager_interval: Duration,
    handle: Arc<Mutex<Option<ManagerHandle>>>,
}

impl SiaBridge {
    pub fn new(
        catalog: Catalog,
        cache: CacheStore,
        remote: Arc<dyn RemoteStorage>,
        manager_interval: Duration,
    ) -> Self {
        let manager = Manager::new(catalog.clone(), cache.clone(), remote.clone());
        Self {
            catalog,
            cache,
            remote,
            manager,
            manager_interval,
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the catalog and build a Sia daemon client from `config`.
    pub async fn connect(config: &BridgeConfig) -> BridgeResult<Self> {
        let catalog = Catalog::connect(&config.database_url).await?;
        let remote = SiadClient::new(&config.siad_address)?;
        Ok(Self::new(
            catalog,
            CacheStore::new(&config.cache_dir),
            Arc::new(remote),
            config.manager_interval,
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Ensure the cache root and schema exist and start the maintenance loop.
    /// Calling it again while running is a no-op.
    pub async fn start(&self) -> BridgeResult<()> {
        self.cache.ensure_root().await?;
        self.catalog.migrate().await?;

        let mut handle = self.handle.lock().await;
        if handle.is_none() {
            *handle = Some(self.manager.clone().spawn(self.manager_interval));
            info!("Bridge started with cache at {}", self.cache.root().display());
        }
        Ok(())
    }

    /// Stop the maintenance loop and close the catalog.
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.stop().await;
        }
        self.catalog.close().await;
        info!("Bridge stopped");
    }

    /// Run one reconcile + evict pass now, unless one is already running.
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> Option<MaintenanceReport> {
        self.manager.run_once(now).await
    }

    /// Create a bucket. Creating an existing bucket succeeds without change.
    pub async fn create_bucket(&self, name: &str) -> BridgeResult<()> {
        ensure_bucket_name_safe(name)?;
        if self.catalog.create_bucket(name, Utc::now()).await? {
            debug!("created bucket {}", name);
        }
        Ok(())
    }

    pub async fn get_bucket_info(&self, name: &str) -> BridgeResult<BucketInfo> {
        self.catalog.get_bucket(name).await
    }

    pub async fn list_buckets(&self) -> BridgeResult<Vec<BucketInfo>> {
        self.catalog.list_buckets().await
    }

    /// Delete a bucket, every object record in it, and its cache subtree.
    pub async fn delete_bucket(&self, name: &str) -> BridgeResult<()> {
        let removed = self.catalog.delete_bucket(name).await?;
        if let Err(err) = self.cache.remove_bucket(name).await {
            warn!("failed to remove cache directory for bucket {}: {}", name, err);
        }
        info!("Deleted bucket {} with {} objects", name, removed.len());
        Ok(())
    }

    pub async fn list_objects(&self, bucket: &str) -> BridgeResult<Vec<ObjectInfo>> {
        self.catalog.list_objects(bucket).await
    }

    pub async fn get_object_info(&self, bucket: &str, name: &str) -> BridgeResult<ObjectInfo> {
        self.catalog.get_object(bucket, name).await
    }

    /// Store `data` as `(bucket, name)`.
    ///
    /// The bytes are staged and synced to the cache, the record is claimed,
    /// the staged file is moved into place, and the upload is submitted. If
    /// anything fails once the record is claimed, both the record and the
    /// cached copy are removed again so the put can simply be retried.
    pub async fn put_object_from_reader<R>(
        &self,
        reader: &mut R,
        bucket: &str,
        name: &str,
        size: i64,
        purge_after: i64,
    ) -> BridgeResult<ObjectInfo>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        ensure_bucket_name_safe(bucket)?;
        ensure_name_safe(name)?;
        if !self.catalog.bucket_exists(bucket).await? {
            return Err(BridgeError::BucketNotFound(bucket.to_string()));
        }

        let staged = self.cache.stage(bucket, reader).await?;
        let actual = staged.size() as i64;
        if actual != size {
            self.cache.discard(staged).await;
            return Err(BridgeError::SizeMismatch {
                expected: size,
                actual,
            });
        }

        if let Err(err) = self
            .catalog
            .insert_object(bucket, name, size, Utc::now(), purge_after.max(0))
            .await
        {
            self.cache.discard(staged).await;
            return Err(err);
        }

        if let Err(err) = self.cache.commit(staged, bucket, name).await {
            self.abandon_put(bucket, name, false).await;
            return Err(err);
        }

        let key = remote_key(bucket, name);
        let source = self.cache.object_path(bucket, name)?;
        if let Err(err) = self.remote.upload(&key, &source).await {
            warn!("upload submission for {} failed: {}", key, err);
            self.abandon_put(bucket, name, true).await;
            return Err(err.into());
        }

        info!("Queued {} ({} bytes) for upload", key, size);
        self.catalog.get_object(bucket, name).await
    }

    /// Undo a put whose record was already inserted.
    async fn abandon_put(&self, bucket: &str, name: &str, remove_cached: bool) {
        if let Err(err) = self.catalog.delete_object(bucket, name).await {
            warn!("failed to roll back record for {}/{}: {}", bucket, name, err);
        }
        if remove_cached {
            if let Err(err) = self.cache.remove(bucket, name).await {
                warn!("failed to roll back cache for {}/{}: {}", bucket, name, err);
            }
        }
    }

    pub async fn put_object_from_bytes(
        &self,
        data: impl AsRef<[u8]>,
        bucket: &str,
        name: &str,
        purge_after: i64,
    ) -> BridgeResult<ObjectInfo> {
        let mut data = data.as_ref();
        let size = data.len() as i64;
        self.put_object_from_reader(&mut data, bucket, name, size, purge_after)
            .await
    }

    /// Store a stream of chunks, e.g. a request body.
    pub async fn put_object_from_stream<S>(
        &self,
        stream: S,
        bucket: &str,
        name: &str,
        size: i64,
        purge_after: i64,
    ) -> BridgeResult<ObjectInfo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let reader = StreamReader::new(stream);
        tokio::pin!(reader);
        self.put_object_from_reader(&mut reader, bucket, name, size, purge_after)
            .await
    }

    /// Store the contents of a local file.
    pub async fn put_object_from_file(
        &self,
        path: impl AsRef<Path>,
        bucket: &str,
        name: &str,
        purge_after: i64,
    ) -> BridgeResult<ObjectInfo> {
        let mut file = File::open(path.as_ref()).await?;
        let size = file.metadata().await?.len() as i64;
        self.put_object_from_reader(&mut file, bucket, name, size, purge_after)
            .await
    }

    /// Write the object's bytes to `writer`. The fetch is counted before any
    /// bytes are written, so a failure never follows delivered data.
    pub async fn get_object<W>(
        &self,
        bucket: &str,
        name: &str,
        writer: &mut W,
    ) -> BridgeResult<FetchSource>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let (_, mut file, source) = self.open_object(bucket, name).await?;
        self.record_fetch(bucket, name, source).await?;
        tokio::io::copy(&mut file, writer).await?;
        writer.flush().await?;
        Ok(source)
    }

    /// Open the object for streaming. The fetch is counted as soon as the
    /// file is open.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        name: &str,
    ) -> BridgeResult<(ObjectInfo, File)> {
        let (info, file, source) = self.open_object(bucket, name).await?;
        self.record_fetch(bucket, name, source).await?;
        Ok((info, file))
    }

    async fn record_fetch(&self, bucket: &str, name: &str, source: FetchSource) -> BridgeResult<()> {
        let now = Utc::now();
        match source {
            FetchSource::Cache => self.catalog.record_cached_fetch(bucket, name, now).await,
            FetchSource::Remote => self.catalog.record_remote_fetch(bucket, name, now).await,
        }
    }

    /// Locate the object's bytes, downloading them into the cache if needed.
    async fn open_object(
        &self,
        bucket: &str,
        name: &str,
    ) -> BridgeResult<(ObjectInfo, File, FetchSource)> {
        let info = self.catalog.get_object(bucket, name).await?;

        if let Some(file) = self.cache.open(bucket, name).await? {
            return Ok((info, file, FetchSource::Cache));
        }

        // Never hand out an object the network has not confirmed as complete.
        if !info.is_durable() {
            return Err(BridgeError::IncompleteUpload {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }

        let key = info.remote_key();
        let staging = self.cache.staging_path(bucket).await?;
        debug!("{} not cached, downloading", key);
        if let Err(err) = self.remote.download(&key, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }

        let promoted = self.cache.link_into_place(&staging, bucket, name).await;
        let _ = fs::remove_file(&staging).await;
        match promoted {
            Ok(()) => {}
            // a concurrent fetch got there first
            Err(BridgeError::AlreadyCached { .. }) => {}
            Err(err) => return Err(err),
        }

        let file = self
            .cache
            .open(bucket, name)
            .await?
            .ok_or_else(|| BridgeError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })?;
        Ok((info, file, FetchSource::Remote))
    }

    /// Delete the object record, its cached copy, and the remote object.
    ///
    /// The record is removed first; a remote failure is still reported.
    /// The cached copy is dropped here rather than left for the evictor,
    /// which only walks files that still have a record. This departs from
    /// the older bridge, which left the file behind.
    pub async fn delete_object(&self, bucket: &str, name: &str) -> BridgeResult<()> {
        if !self.catalog.delete_object(bucket, name).await? {
            return Err(BridgeError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }
        if let Err(err) = self.cache.remove(bucket, name).await {
            warn!("failed to remove cached copy of {}/{}: {}", bucket, name, err);
        }
        let key = remote_key(bucket, name);
        self.remote.delete(&key).await?;
        info!("Deleted {}", key);
        Ok(())
    }
}

/// Bucket names become a single directory under the cache root.
fn ensure_bucket_name_safe(name: &str) -> BridgeResult<()> {
    let reason = if name.is_empty() || name.len() > MAX_BUCKET_NAME_LEN {
        Some("must be between 1 and 255 bytes")
    } else if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        Some("must not contain path separators or be a relative path")
    } else if name.bytes().any(|b| b.is_ascii_control()) {
        Some("must not contain control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(BridgeError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        }),
        None => Ok(()),
    }
}

/// Rejects names that could escape the bucket directory or collide with
/// staging files.
fn ensure_name_safe(name: &str) -> BridgeResult<()> {
    if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
        return Err(BridgeError::InvalidObjectName);
    }
    if name.contains("..") {
        return Err(BridgeError::InvalidObjectName);
    }
    // Every segment must name a real path component, otherwise two names
    // share one cache file ("./a" and "a", "x//y" and "x/y").
    if name.split('/').any(|segment| segment.is_empty() || segment == ".") {
        return Err(BridgeError::InvalidObjectName);
    }
    if name.starts_with(".tmp-") || name.contains("/.tmp-") {
        return Err(BridgeError::InvalidObjectName);
    }
    if name.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(BridgeError::InvalidObjectName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_stay_inside_cache_root() {
        assert!(ensure_bucket_name_safe("TestBucket1").is_ok());
        assert!(ensure_bucket_name_safe("my.bucket-2").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "tab\there"] {
            assert!(ensure_bucket_name_safe(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn object_names_stay_inside_bucket() {
        assert!(ensure_name_safe("TestFile1.txt").is_ok());
        assert!(ensure_name_safe("photos/2024/cat.jpg").is_ok());
        for bad in ["", "/etc/passwd", "a/../b", "dir/", ".tmp-123", "x/.tmp-1", "nul\0"] {
            assert!(ensure_name_safe(bad).is_err(), "{bad:?}");
        }
        for alias in [".", "./a", "a/.", "x/./y", "x//y", "//y"] {
            assert!(ensure_name_safe(alias).is_err(), "{alias:?}");
        }
        assert!(ensure_name_safe(".hidden/.config").is_ok());
    }
}
