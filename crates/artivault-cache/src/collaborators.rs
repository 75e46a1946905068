//! External collaborators of the cache: binary content store and remote transport.
//!
//! Both are traits so the daemon and tests can plug in their own
//! implementations. The in-memory versions here back the tests and the
//! standalone daemon.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use artivault_core::{compute_checksums, ChecksumType, Checksums, RepoError, RepoPath, RepoResult};
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

/// Content-addressed blob storage.
pub trait BinaryStore: Send + Sync {
    /// Reads the content stored under `digest`.
    fn fetch(&self, digest: &str) -> RepoResult<Bytes>;

    /// Stores `content` and returns its digest.
    fn store(&self, content: Bytes) -> RepoResult<String>;

    /// Removes the content stored under `digest`. Returns false if absent.
    fn delete(&self, digest: &str) -> RepoResult<bool>;
}

/// Content and metadata served by a remote repository.
#[derive(Clone, Debug, Default)]
pub struct RemoteContent {
    /// Raw content.
    pub bytes: Bytes,
    /// Checksums the origin declares for the content.
    pub declared: Checksums,
    /// Last-modified time at the origin, ms since epoch.
    pub last_modified: u64,
}

impl RemoteContent {
    /// Content with no declared checksums.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Default::default()
        }
    }

    /// Content whose origin declares the true checksums of every type.
    pub fn with_valid_checksums(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let declared = compute_checksums(&bytes);
        Self {
            bytes,
            declared,
            last_modified: 0,
        }
    }

    /// Adds a declared checksum.
    pub fn declare(mut self, checksum_type: ChecksumType, value: impl Into<String>) -> Self {
        self.declared.insert(checksum_type, value.into());
        self
    }

    /// Content size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Fetches content from the origin of a remote repository.
///
/// A missing resource is reported as [`RepoError::NotFound`]; any other
/// failure as [`RepoError::Transport`].
pub trait RemoteTransport: Send + Sync {
    /// Downloads `path` from the origin.
    fn retrieve(&self, path: &RepoPath) -> RepoResult<RemoteContent>;
}

/// Blob store kept in memory, keyed by SHA-256.
#[derive(Debug, Default)]
pub struct InMemoryBinaryStore {
    blobs: DashMap<String, Bytes>,
}

impl InMemoryBinaryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Returns true if a blob with this digest is stored.
    pub fn contains(&self, digest: &str) -> bool {
        self.blobs.contains_key(digest)
    }
}

impl BinaryStore for InMemoryBinaryStore {
    fn fetch(&self, digest: &str) -> RepoResult<Bytes> {
        self.blobs
            .get(digest)
            .map(|b| b.value().clone())
            .ok_or_else(|| RepoError::NotFound(format!("blob {}", digest)))
    }

    fn store(&self, content: Bytes) -> RepoResult<String> {
        let digest = hex::encode(Sha256::digest(&content));
        trace!(digest = %digest, size = content.len(), "storing blob");
        self.blobs.insert(digest.clone(), content);
        Ok(digest)
    }

    fn delete(&self, digest: &str) -> RepoResult<bool> {
        Ok(self.blobs.remove(digest).is_some())
    }
}

/// Serves a fixed set of resources and counts calls.
#[derive(Debug, Default)]
pub struct StaticTransport {
    resources: DashMap<String, RemoteContent>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl StaticTransport {
    /// Creates a transport serving nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `content` for the relative path `path` in any repository.
    pub fn insert(&self, path: &str, content: RemoteContent) {
        self.resources
            .insert(RepoPath::new("", path).path().to_string(), content);
    }

    /// Stops serving `path`.
    pub fn remove(&self, path: &str) -> bool {
        self.resources
            .remove(RepoPath::new("", path).path())
            .is_some()
    }

    /// Makes every call fail with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `retrieve` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteTransport for StaticTransport {
    fn retrieve(&self, path: &RepoPath) -> RepoResult<RemoteContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepoError::Transport {
                path: path.clone(),
                reason: "origin unreachable".to_string(),
            });
        }
        debug!(repo_path = %path, "remote retrieve");
        self.resources
            .get(path.path())
            .map(|c| c.value().clone())
            .ok_or_else(|| RepoError::NotFound(path.to_string()))
    }
}

/// Transport for repositories without a configured origin connection.
#[derive(Debug, Default)]
pub struct OfflineTransport;

impl RemoteTransport for OfflineTransport {
    fn retrieve(&self, path: &RepoPath) -> RepoResult<RemoteContent> {
        Err(RepoError::Transport {
            path: path.clone(),
            reason: "no remote transport configured".to_string(),
        })
    }
}
