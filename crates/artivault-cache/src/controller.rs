//! Cache consistency for the local cache of a remote repository.
//!
//! A [`CacheRepo`] decides whether a cached item is still valid, refreshes it
//! from the origin when it is not, and supports forced invalidation:
//!
//! - `get_info` serves a cached item or a not-found sentinel carrying the
//!   stale metadata when the item expired.
//! - `unexpire` marks a cached item fresh without fetching it.
//! - `zap` marks a subtree expired and cascades to dependent caches.
//!
//! Every mutation goes through a [`LockingSession`](artivault_lock::LockingSession)
//! on the shared [`LockRegistry`], so concurrent requests for one item are
//! linearised and readers only ever see committed snapshots.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use artivault_core::naming::checksum_target;
use artivault_core::{
    classify, compute_checksums, now_millis, ArtifactKind, ChecksumSet, ChecksumType, Decision, FileInfo, FolderInfo,
    ItemInfo, PathPolicyMatcher, RemoteRepoConfig, RepoError, RepoPath, RepoResult,
};
use artivault_lock::LockRegistry;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::collaborators::{RemoteContent, RemoteTransport};
use crate::content::ContentStore;
use crate::dependents::{DependentCache, DependentCacheRegistry};
use crate::missed::MissedRetrievalCache;
use crate::resource::RepoResource;

/// Returns true if a cached file must be refreshed before it is served.
///
/// An unknown age (`-1`: never fetched or zapped) is always expired. A
/// release with a known age never expires; every other kind expires once its
/// age exceeds the retrieval cache period.
pub fn is_expired(kind: ArtifactKind, age_ms: i64, period: Duration) -> bool {
    if age_ms < 0 {
        return true;
    }
    match kind {
        ArtifactKind::Release => false,
        ArtifactKind::UniqueSnapshot | ArtifactKind::NonUniqueSnapshot | ArtifactKind::Metadata => {
            u128::from(age_ms.unsigned_abs()) > period.as_millis()
        }
    }
}

/// Configuration snapshot used for the whole of one operation.
#[derive(Debug)]
struct Descriptor {
    config: RemoteRepoConfig,
    matcher: PathPolicyMatcher,
}

impl Descriptor {
    fn new(config: RemoteRepoConfig) -> RepoResult<Self> {
        let matcher = config.path_policy()?;
        Ok(Self { config, matcher })
    }
}

/// The local cache of one remote repository.
pub struct CacheRepo {
    key: String,
    descriptor: RwLock<Arc<Descriptor>>,
    registry: Arc<LockRegistry>,
    store: Arc<ContentStore>,
    transport: Arc<dyn RemoteTransport>,
    missed: Arc<MissedRetrievalCache>,
    dependents: DependentCacheRegistry,
}

impl CacheRepo {
    /// Creates the cache for `config`.
    ///
    /// Fails with [`RepoError::Config`] if the path patterns are malformed.
    pub fn new(
        config: RemoteRepoConfig,
        registry: Arc<LockRegistry>,
        store: Arc<ContentStore>,
        transport: Arc<dyn RemoteTransport>,
    ) -> RepoResult<Self> {
        let descriptor = Descriptor::new(config)?;
        let key = descriptor.config.key.clone();
        let missed = Arc::new(MissedRetrievalCache::new(
            &key,
            descriptor.config.missed_retrieval_cache_period(),
        ));
        let dependents = DependentCacheRegistry::new();
        dependents.register(missed.clone());
        info!(
            repo = %key,
            url = %descriptor.config.url,
            policy = %descriptor.config.checksum_policy,
            period = ?descriptor.config.retrieval_cache_period(),
            "cache repository ready"
        );
        Ok(Self {
            key,
            descriptor: RwLock::new(Arc::new(descriptor)),
            registry,
            store,
            transport,
            missed,
            dependents,
        })
    }

    /// The repository key; cached items live under it.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The current configuration.
    pub fn config(&self) -> RemoteRepoConfig {
        self.descriptor().config.clone()
    }

    /// The shared lock registry.
    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// The negative cache of origin misses.
    pub fn missed_cache(&self) -> &Arc<MissedRetrievalCache> {
        &self.missed
    }

    /// Adds a cache to be invalidated by every zap on this repository.
    pub fn register_dependent(&self, cache: Arc<dyn DependentCache>) {
        self.dependents.register(cache);
    }

    /// Builds the identity of `path` in this repository.
    pub fn repo_path(&self, path: &str) -> RepoPath {
        RepoPath::new(self.key.as_str(), path)
    }

    /// Swaps the configuration.
    ///
    /// Operations already running keep the configuration they started with.
    pub fn reload(&self, config: RemoteRepoConfig) -> RepoResult<()> {
        if config.key != self.key {
            return Err(RepoError::Config(format!(
                "cannot reload repository '{}' with configuration of '{}'",
                self.key, config.key
            )));
        }
        let descriptor = Descriptor::new(config)?;
        self.missed
            .set_period(descriptor.config.missed_retrieval_cache_period());
        *self.descriptor.write() = Arc::new(descriptor);
        info!(repo = %self.key, "configuration reloaded");
        Ok(())
    }

    /// Returns the cached item, or a not-found sentinel.
    ///
    /// The sentinel carries the stale metadata when the item is cached but
    /// expired. Never contacts the origin.
    pub fn get_info(&self, path: &RepoPath) -> RepoResult<RepoResource> {
        let descriptor = self.descriptor();
        self.admit(&descriptor, path)?;
        let cached = self.registry.with_session(|s| s.read(path))?;
        Ok(judge(&descriptor, path, cached, now_millis()))
    }

    /// Resolves `path`, fetching it from the origin when the cached copy is
    /// missing or expired.
    ///
    /// Content failing the checksum policy is not committed and the call
    /// fails with [`RepoError::ChecksumRejected`].
    pub fn retrieve(&self, path: &RepoPath) -> RepoResult<RepoResource> {
        let descriptor = self.descriptor();
        self.admit(&descriptor, path)?;

        let cached = self.registry.with_session(|s| s.read(path))?;
        let stale = match judge(&descriptor, path, cached, now_millis()) {
            found @ RepoResource::Found(_) => return Ok(found),
            RepoResource::NotFound { detail, .. } => detail,
        };
        if stale.is_none() && self.missed.is_missed(path) {
            debug!(repo_path = %path, "origin miss still cached");
            return Ok(RepoResource::not_found(path, "recently not found at origin"));
        }

        let content = match self.transport.retrieve(path) {
            Ok(content) => content,
            Err(RepoError::NotFound(_)) => {
                self.missed.record(path);
                return Ok(RepoResource::not_found(path, "not found at origin"));
            }
            Err(e) => {
                warn!(repo_path = %path, error = %e, "remote retrieval failed");
                return Err(e);
            }
        };
        let info = self.commit_content(&descriptor, path, content)?;
        Ok(RepoResource::Found(info))
    }

    /// Reads the content of a found file from the binary store.
    pub fn fetch_content(&self, resource: &RepoResource) -> RepoResult<Bytes> {
        let info = resource
            .info()
            .ok_or_else(|| RepoError::NotFound(resource.repo_path().to_string()))?;
        let digest = info
            .as_file()
            .and_then(|f| f.digest.as_deref())
            .ok_or_else(|| RepoError::NotFound(format!("{} has no content", info.repo_path())))?;
        self.store.fetch(digest)
    }

    /// The checksum value served to clients for a cached file, chosen by the
    /// checksum policy.
    pub fn checksum_for_client(&self, path: &RepoPath, checksum_type: ChecksumType) -> RepoResult<Option<String>> {
        let descriptor = self.descriptor();
        self.admit(&descriptor, path)?;
        let cached = self.registry.with_session(|s| s.read(path))?;
        Ok(cached.as_deref().and_then(ItemInfo::as_file).and_then(|f| {
            descriptor
                .config
                .checksum_policy
                .checksum_to_return(checksum_type, &f.checksums)
        }))
    }

    /// Answers a request for a checksum sidecar such as `a-1.0.jar.sha1`.
    pub fn checksum_request(&self, checksum_path: &RepoPath) -> RepoResult<Option<String>> {
        let (target, checksum_type) =
            checksum_target(checksum_path.path()).ok_or_else(|| RepoError::PathRejected {
                path: checksum_path.clone(),
                reason: "not a checksum path".to_string(),
            })?;
        let target = RepoPath::new(checksum_path.repo_key(), target);
        self.checksum_for_client(&target, checksum_type)
    }

    /// Marks a cached file fresh without contacting the origin.
    ///
    /// Returns false if nothing is cached at `path`.
    pub fn unexpire(&self, path: &RepoPath) -> RepoResult<bool> {
        let descriptor = self.descriptor();
        self.admit(&descriptor, path)?;
        let now = now_millis();
        let touched = self.registry.with_session(|s| match s.write(path) {
            Ok(working) => Ok(match working.as_file_mut() {
                Some(file) => {
                    file.last_updated = now;
                    true
                }
                None => false,
            }),
            Err(RepoError::NoSuchItem(_)) => Ok(false),
            Err(e) => Err(e),
        })?;
        if touched {
            debug!(repo_path = %path, "unexpired");
        }
        Ok(touched)
    }

    /// Forces `path` and everything below it to be refetched on next access.
    ///
    /// Fresh cached files get an unknown age; missing or already expired items
    /// are left alone. Dependent caches are then invalidated for `path`.
    /// Returns the number of invalidations. Items that cannot be locked are
    /// logged and skipped.
    ///
    /// A zapped release is expired like any other kind until it is refetched
    /// or unexpired, so [`cleanup_expired`](Self::cleanup_expired) evicts it.
    pub fn zap(&self, path: &RepoPath) -> usize {
        if path.repo_key() != self.key {
            debug!(repo = %self.key, repo_path = %path, "zap on foreign path ignored");
            return 0;
        }
        let descriptor = self.descriptor();
        let mut invalidated = 0;
        for target in self.registry.paths_under(path) {
            match self.expire_one(&descriptor, &target) {
                Ok(true) => invalidated += 1,
                Ok(false) => {}
                Err(e) => warn!(repo_path = %target, error = %e, "zap skipped item"),
            }
        }
        invalidated += self.dependents.invalidate_all(path);
        info!(repo_path = %path, invalidated, "zap");
        invalidated
    }

    /// Cached files whose copy is expired.
    pub fn expired_paths(&self) -> Vec<RepoPath> {
        let descriptor = self.descriptor();
        let period = descriptor.config.retrieval_cache_period();
        let now = now_millis();
        self.registry
            .paths_under(&RepoPath::root(self.key.as_str()))
            .into_iter()
            .filter(|p| {
                self.registry
                    .snapshot(p)
                    .and_then(|info| info.as_file().map(|f| is_expired(classify(p.path()), f.age(now), period)))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Drops a cached file and deletes its content unless another cached item
    /// shares it or a commit in flight has pinned it.
    ///
    /// Returns false if `path` is not a cached file.
    pub fn evict(&self, path: &RepoPath) -> RepoResult<bool> {
        let evicted = self.registry.with_session(|s| {
            let digest = match s.write(path) {
                Ok(working) if working.is_file() => working.as_file().and_then(|f| f.digest.clone()),
                Ok(_) | Err(RepoError::NoSuchItem(_)) => return Ok(None),
                Err(e) => return Err(e),
            };
            s.mark_deleted(path)?;
            Ok(Some(digest))
        })?;
        let Some(digest) = evicted else {
            return Ok(false);
        };
        if let Some(digest) = digest {
            let deleted = self.store.delete_unreferenced(&digest, |d| {
                self.registry
                    .any_snapshot(|i| i.as_file().and_then(|f| f.digest.as_deref()) == Some(d))
            });
            if let Err(e) = deleted {
                warn!(repo_path = %path, digest = %digest, error = %e, "content delete failed");
            }
        }
        self.dependents.invalidate_all(path);
        debug!(repo_path = %path, "evicted");
        Ok(true)
    }

    /// Evicts every expired cached file. Returns how many were evicted.
    pub fn cleanup_expired(&self) -> usize {
        let mut evicted = 0;
        for path in self.expired_paths() {
            match self.evict(&path) {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(e) => warn!(repo_path = %path, error = %e, "eviction skipped item"),
            }
        }
        if evicted > 0 {
            info!(repo = %self.key, evicted, "expired items evicted");
        }
        evicted
    }

    fn descriptor(&self) -> Arc<Descriptor> {
        self.descriptor.read().clone()
    }

    fn admit(&self, descriptor: &Descriptor, path: &RepoPath) -> RepoResult<()> {
        if path.repo_key() != self.key {
            return Err(RepoError::PathRejected {
                path: path.clone(),
                reason: format!("not in repository '{}'", self.key),
            });
        }
        if !descriptor.matcher.accepts(path.path()) {
            return Err(RepoError::PathRejected {
                path: path.clone(),
                reason: "excluded by the include/exclude patterns".to_string(),
            });
        }
        if !descriptor.matcher.handles(path.path()) {
            return Err(RepoError::PathRejected {
                path: path.clone(),
                reason: format!("{:?} artifacts are not handled", classify(path.path())),
            });
        }
        Ok(())
    }

    fn commit_content(&self, descriptor: &Descriptor, path: &RepoPath, content: RemoteContent) -> RepoResult<Arc<ItemInfo>> {
        let policy = descriptor.config.checksum_policy;
        let computed = compute_checksums(&content.bytes);
        let checksums = ChecksumSet::from_parts(&content.declared, &computed);
        match policy.verify(&checksums) {
            Decision::Reject(reason) => {
                warn!(repo_path = %path, policy = %policy, reason = %reason, "content rejected by checksum policy");
                return Err(RepoError::ChecksumRejected {
                    path: path.clone(),
                    reason,
                });
            }
            Decision::AcceptWithWarning(reason) => {
                warn!(repo_path = %path, policy = %policy, reason = %reason, "content accepted with checksum warning");
            }
            Decision::Accept => {}
        }

        let size = content.size();
        let last_modified = content.last_modified;
        let pin = self.store.store_pinned(content.bytes)?;
        let digest = pin.digest().to_string();
        let now = now_millis();
        let committed = self.registry.with_session(|s| {
            for folder in ancestors(path) {
                s.write_or_create(&folder, || ItemInfo::Folder(FolderInfo::new(folder.clone())))?;
            }
            let working = s.write_or_create(path, || ItemInfo::File(FileInfo::new(path.clone())))?;
            let Some(file) = working.as_file_mut() else {
                return Err(RepoError::PathRejected {
                    path: path.clone(),
                    reason: "a folder exists at this path".to_string(),
                });
            };
            file.size = size;
            file.last_modified = last_modified;
            file.last_updated = now;
            file.digest = Some(digest.clone());
            file.checksums = checksums;
            Ok(Arc::new(working.clone()))
        })?;
        drop(pin);
        self.missed.forget(path);
        info!(repo_path = %path, size, digest = %digest, "remote content cached");
        Ok(committed)
    }

    fn expire_one(&self, descriptor: &Descriptor, path: &RepoPath) -> RepoResult<bool> {
        let period = descriptor.config.retrieval_cache_period();
        let kind = classify(path.path());
        let now = now_millis();
        let fresh = |info: &ItemInfo| info.as_file().is_some_and(|f| !is_expired(kind, f.age(now), period));
        if !self.registry.snapshot(path).is_some_and(|i| fresh(&*i)) {
            return Ok(false);
        }
        self.registry.with_session(|s| {
            let working = match s.write(path) {
                Ok(working) => working,
                Err(RepoError::NoSuchItem(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
            if !fresh(&*working) {
                return Ok(false);
            }
            match working.as_file_mut() {
                Some(file) => {
                    file.last_updated = 0;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}

impl fmt::Debug for CacheRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRepo")
            .field("key", &self.key)
            .field("dependents", &self.dependents)
            .finish()
    }
}

fn judge(descriptor: &Descriptor, path: &RepoPath, cached: Option<Arc<ItemInfo>>, now: u64) -> RepoResource {
    let Some(info) = cached else {
        return RepoResource::not_found(path, "not cached");
    };
    let Some(age) = info.as_file().map(|f| f.age(now)) else {
        return RepoResource::Found(info);
    };
    let kind = classify(path.path());
    if is_expired(kind, age, descriptor.config.retrieval_cache_period()) {
        debug!(repo_path = %path, ?kind, age, "cached copy expired");
        RepoResource::expired(info)
    } else {
        RepoResource::Found(info)
    }
}

/// Folders above `path`, outermost first, excluding the root.
fn ancestors(path: &RepoPath) -> Vec<RepoPath> {
    let mut folders = Vec::new();
    let mut current = path.parent();
    while let Some(folder) = current {
        if folder.is_root() {
            break;
        }
        current = folder.parent();
        folders.push(folder);
    }
    folders.reverse();
    folders
}
