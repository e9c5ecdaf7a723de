//! Remote storage network client.
//!
//! The bridge only needs four capabilities from the remote network: submit an
//! upload, download an object into a local path, delete an object, and list
//! which submitted objects are currently available. Submission is not
//! completion; durability is only ever observed through `list_availability`.
//!
//! `SiadClient` talks to a Sia daemon over its HTTP API. `MemoryRemote` keeps
//! everything in process and lets callers decide when uploads become available.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::debug;

/// The Sia daemon rejects requests that do not carry this user agent.
const SIA_USER_AGENT: &str = "Sia-Agent";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to remote daemon failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote daemon returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("object `{0}` not found on remote network")]
    NotFound(String),
    #[error("invalid remote address `{0}`")]
    InvalidAddress(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Availability of one previously submitted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub object_key: String,
    pub available: bool,
}

/// Capability to move object bytes to and from the remote network.
///
/// Calls block the calling task until the remote side answers and are never
/// retried implicitly.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Ask the remote network to store the file at `source` under `object_key`.
    /// Returns once the request is accepted, not once the object is durable.
    async fn upload(&self, object_key: &str, source: &Path) -> RemoteResult<()>;

    /// Retrieve `object_key` into `destination`, waiting for completion.
    async fn download(&self, object_key: &str, destination: &Path) -> RemoteResult<()>;

    async fn delete(&self, object_key: &str) -> RemoteResult<()>;

    /// Snapshot of every submitted object and whether it is retrievable.
    async fn list_availability(&self) -> RemoteResult<Vec<RemoteFile>>;
}

/// Client for the Sia daemon renter API.
#[derive(Clone, Debug)]
pub struct SiadClient {
    base: Url,
    http: Client,
}

#[derive(Deserialize)]
struct RenterFiles {
    #[serde(default)]
    files: Option<Vec<RenterFile>>,
}

#[derive(Deserialize)]
struct RenterFile {
    siapath: String,
    available: bool,
}

#[derive(Deserialize)]
struct DaemonError {
    message: String,
}

impl SiadClient {
    /// Build a client for the daemon listening on `address` (e.g. `127.0.0.1:9980`).
    pub fn new(address: &str) -> RemoteResult<Self> {
        let raw = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let base = Url::parse(&raw).map_err(|_| RemoteError::InvalidAddress(address.into()))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidAddress(address.into()));
        }
        let http = Client::builder()
            .user_agent(SIA_USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { base, http })
    }

    /// `base/<route...>/<object key segments...>`, percent-encoding each segment.
    fn endpoint(&self, route: &[&str], object_key: Option<&str>) -> RemoteResult<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::InvalidAddress(self.base.to_string()))?;
            segments.pop_if_empty().extend(route);
            if let Some(key) = object_key {
                segments.extend(key.split('/'));
            }
        }
        Ok(url)
    }

    /// Turn a non-success response into `RemoteError::Status`, keeping the
    /// daemon's message when it sends one.
    async fn check(response: Response) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<DaemonError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteStorage for SiadClient {
    async fn upload(&self, object_key: &str, source: &Path) -> RemoteResult<()> {
        let url = self.endpoint(&["renter", "upload"], Some(object_key))?;
        let source = source.to_string_lossy().into_owned();
        debug!("submitting upload {} from {}", object_key, source);
        let response = self
            .http
            .post(url)
            .form(&[("source", source)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn download(&self, object_key: &str, destination: &Path) -> RemoteResult<()> {
        let url = self.endpoint(&["renter", "download"], Some(object_key))?;
        let destination = destination.to_string_lossy().into_owned();
        debug!("downloading {} into {}", object_key, destination);
        let response = self
            .http
            .get(url)
            .query(&[("destination", destination)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, object_key: &str) -> RemoteResult<()> {
        let url = self.endpoint(&["renter", "delete"], Some(object_key))?;
        let response = self.http.post(url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_availability(&self) -> RemoteResult<Vec<RemoteFile>> {
        let url = self.endpoint(&["renter", "files"], None)?;
        let response = Self::check(self.http.get(url).send().await?).await?;
        let files: RenterFiles = response.json().await?;
        Ok(files
            .files
            .unwrap_or_default()
            .into_iter()
            .map(|f| RemoteFile {
                object_key: f.siapath,
                available: f.available,
            })
            .collect())
    }
}

struct StoredObject {
    data: Vec<u8>,
    available: bool,
}

/// In-process remote network.
///
/// Uploads are captured immediately but stay unavailable until
/// [`MemoryRemote::mark_available`] is called, mirroring how a real network
/// only confirms durability some time after accepting an upload.
#[derive(Default)]
pub struct MemoryRemote {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_uploads: AtomicBool,
    fail_listing: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a submitted object as durable. Returns `false` if it was never uploaded.
    pub async fn mark_available(&self, object_key: &str) -> bool {
        match self.objects.lock().await.get_mut(object_key) {
            Some(obj) => {
                obj.available = true;
                true
            }
            None => false,
        }
    }

    pub async fn mark_all_available(&self) {
        for obj in self.objects.lock().await.values_mut() {
            obj.available = true;
        }
    }

    pub async fn contains(&self, object_key: &str) -> bool {
        self.objects.lock().await.contains_key(object_key)
    }

    /// Make every subsequent upload submission fail.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent availability listing fail.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemote {
    async fn upload(&self, object_key: &str, source: &Path) -> RemoteResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 500,
                message: "upload rejected".into(),
            });
        }
        let data = fs::read(source).await?;
        self.objects.lock().await.insert(
            object_key.to_string(),
            StoredObject {
                data,
                available: false,
            },
        );
        Ok(())
    }

    async fn download(&self, object_key: &str, destination: &Path) -> RemoteResult<()> {
        let data = match self.objects.lock().await.get(object_key) {
            Some(obj) if obj.available => obj.data.clone(),
            _ => return Err(RemoteError::NotFound(object_key.to_string())),
        };
        fs::write(destination, data).await?;
        Ok(())
    }

    async fn delete(&self, object_key: &str) -> RemoteResult<()> {
        match self.objects.lock().await.remove(object_key) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(object_key.to_string())),
        }
    }

    async fn list_availability(&self) -> RemoteResult<Vec<RemoteFile>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                message: "renter unavailable".into(),
            });
        }
        Ok(self
            .objects
            .lock()
            .await
            .iter()
            .map(|(key, obj)| RemoteFile {
                object_key: key.clone(),
                available: obj.available,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_object_key_segments() {
        let client = SiadClient::new("127.0.0.1:9980").unwrap();
        let url = client
            .endpoint(&["renter", "upload"], Some("My Bucket/a b.txt"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9980/renter/upload/My%20Bucket/a%20b.txt"
        );

        let files = client.endpoint(&["renter", "files"], None).unwrap();
        assert_eq!(files.as_str(), "http://127.0.0.1:9980/renter/files");
    }

    #[test]
    fn renter_files_tolerates_null_list() {
        let parsed: RenterFiles = serde_json::from_str(r#"{"files":null}"#).unwrap();
        assert!(parsed.files.is_none());

        let parsed: RenterFiles = serde_json::from_str(
            r#"{"files":[{"siapath":"b/o","available":true,"redundancy":1.5}]}"#,
        )
        .unwrap();
        let files = parsed.files.unwrap();
        assert_eq!(files[0].siapath, "b/o");
        assert!(files[0].available);
    }

    #[tokio::test]
    async fn memory_remote_hides_objects_until_available() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"hello").await.unwrap();

        let remote = MemoryRemote::new();
        remote.upload("b/o", &src).await.unwrap();
        assert!(matches!(
            remote.download("b/o", &dst).await,
            Err(RemoteError::NotFound(_))
        ));

        assert!(remote.mark_available("b/o").await);
        remote.download("b/o", &dst).await.unwrap();
        assert_eq!(fs::read(&dst).await.unwrap(), b"hello");
    }
}
