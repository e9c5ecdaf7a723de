//! Local cache store.
//!
//! Mirrors the bucket/object namespace on disk as `<root>/<bucket>/<name>`.
//! The cached file doubles as the staging buffer handed to the remote network
//! for upload, so every write is flushed and synced before it becomes visible
//! under its final name. Files only appear at their final path through a
//! hard link, which never replaces existing content.

use crate::errors::{BridgeError, BridgeResult};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

/// Bytes written to a temporary file that has not been linked into place yet.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache root if it does not exist yet.
    pub async fn ensure_root(&self) -> BridgeResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Absolute path of the cached copy of `(bucket, name)`. The file may not exist.
    pub fn object_path(&self, bucket: &str, name: &str) -> BridgeResult<PathBuf> {
        Ok(std::path::absolute(self.bucket_dir(bucket).join(name))?)
    }

    pub async fn exists(&self, bucket: &str, name: &str) -> BridgeResult<bool> {
        let path = self.object_path(bucket, name)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Fresh temporary path inside the bucket directory, creating the directory.
    pub async fn staging_path(&self, bucket: &str) -> BridgeResult<PathBuf> {
        let dir = self.bucket_dir(bucket);
        fs::create_dir_all(&dir).await?;
        Ok(std::path::absolute(
            dir.join(format!(".tmp-{}", Uuid::new_v4())),
        )?)
    }

    /// Stream `reader` into a new temporary file under the bucket directory.
    ///
    /// The file is flushed and synced before returning. It is removed again
    /// if anything goes wrong while writing.
    pub async fn stage<R>(&self, bucket: &str, reader: &mut R) -> BridgeResult<StagedFile>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.staging_path(bucket).await?;
        match write_synced(&path, reader).await {
            Ok(size) => Ok(StagedFile { path, size }),
            Err(err) => {
                let _ = fs::remove_file(&path).await;
                Err(BridgeError::CacheIo(err))
            }
        }
    }

    /// Move a staged file to the cached location of `(bucket, name)`.
    ///
    /// Fails with `AlreadyCached` if content is already present; the staged
    /// file is consumed either way.
    pub async fn commit(&self, staged: StagedFile, bucket: &str, name: &str) -> BridgeResult<()> {
        let result = self.link_into_place(&staged.path, bucket, name).await;
        if let Err(err) = fs::remove_file(&staged.path).await {
            debug!(
                "failed to remove staged file {}: {}",
                staged.path.display(),
                err
            );
        }
        result
    }

    /// Drop a staged file that will never be committed.
    pub async fn discard(&self, staged: StagedFile) {
        if let Err(err) = fs::remove_file(&staged.path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to discard staged file {}: {}",
                    staged.path.display(),
                    err
                );
            }
        }
    }

    /// Stage and commit in one step. Returns the number of bytes written.
    pub async fn write<R>(&self, bucket: &str, name: &str, reader: &mut R) -> BridgeResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let staged = self.stage(bucket, reader).await?;
        let size = staged.size;
        self.commit(staged, bucket, name).await?;
        Ok(size)
    }

    /// Promote an arbitrary file (e.g. a finished download) into the cache.
    /// Content already in place wins and `src` is left for the caller.
    pub(crate) async fn link_into_place(
        &self,
        src: &Path,
        bucket: &str,
        name: &str,
    ) -> BridgeResult<()> {
        let dest = self.object_path(bucket, name)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::hard_link(src, &dest).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(BridgeError::AlreadyCached {
                bucket: bucket.to_string(),
                name: name.to_string(),
            }),
            Err(err) => Err(BridgeError::CacheIo(err)),
        }
    }

    /// Open the cached copy for reading, or `None` if it is not cached.
    pub async fn open(&self, bucket: &str, name: &str) -> BridgeResult<Option<File>> {
        let path = self.object_path(bucket, name)?;
        match File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BridgeError::CacheIo(err)),
        }
    }

    /// Remove the cached copy. Returns whether a file was actually removed;
    /// absence is not an error.
    pub async fn remove(&self, bucket: &str, name: &str) -> BridgeResult<bool> {
        let path = self.object_path(bucket, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed cached file {}", path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BridgeError::CacheIo(err)),
        }
    }

    /// Remove a bucket's whole cache subtree. Absence is not an error.
    pub async fn remove_bucket(&self, bucket: &str) -> BridgeResult<()> {
        let dir = self.bucket_dir(bucket);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BridgeError::CacheIo(err)),
        }
    }
}

async fn write_synced<R>(path: &Path, reader: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = File::create(path).await?;
    let size = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_cached(cache: &CacheStore, bucket: &str, name: &str) -> Vec<u8> {
        let mut file = cache.open(bucket, name).await.unwrap().unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn write_creates_bucket_dir_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());

        let written = cache
            .write("docs", "notes/today.txt", &mut &b"remember the milk"[..])
            .await
            .unwrap();
        assert_eq!(written, 17);
        assert!(cache.exists("docs", "notes/today.txt").await.unwrap());
        assert_eq!(
            read_cached(&cache, "docs", "notes/today.txt").await,
            b"remember the milk"
        );
    }

    #[tokio::test]
    async fn write_never_overwrites_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());

        cache.write("docs", "a", &mut &b"first"[..]).await.unwrap();
        let err = cache
            .write("docs", "a", &mut &b"second"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyCached { .. }));
        assert_eq!(read_cached(&cache, "docs", "a").await, b"first");

        // no staged leftovers besides the committed file
        let mut entries = fs::read_dir(cache.bucket_dir("docs")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn remove_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());

        assert!(!cache.remove("docs", "missing").await.unwrap());
        cache.write("docs", "a", &mut &b"x"[..]).await.unwrap();
        assert!(cache.remove("docs", "a").await.unwrap());
        assert!(cache.open("docs", "a").await.unwrap().is_none());

        cache.remove_bucket("docs").await.unwrap();
        cache.remove_bucket("docs").await.unwrap();
        assert!(!fs::try_exists(cache.bucket_dir("docs")).await.unwrap());
    }

    #[tokio::test]
    async fn discarded_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());

        let staged = cache.stage("docs", &mut &b"tmp"[..]).await.unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(staged.size(), 3);
        cache.discard(staged).await;
        assert!(!fs::try_exists(&path).await.unwrap());
    }
}
