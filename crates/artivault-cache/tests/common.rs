//! Common test utilities and fixtures for cache integration tests.

use std::sync::Arc;
use std::time::Duration;

use artivault_cache::{CacheRepo, ContentStore, InMemoryBinaryStore, StaticTransport};
use artivault_core::{now_millis, ChecksumPolicy, FileInfo, ItemInfo, RemoteRepoConfig, RepoPath};
use artivault_lock::LockRegistry;

/// A cache repository wired to in-memory collaborators.
pub struct Fixture {
    pub registry: Arc<LockRegistry>,
    pub store: Arc<InMemoryBinaryStore>,
    pub transport: Arc<StaticTransport>,
    pub repo: Arc<CacheRepo>,
}

impl Fixture {
    /// `key` with a one hour retrieval cache period.
    pub fn new(key: &str) -> Self {
        Self::with_policy(key, ChecksumPolicy::GenerateIfAbsent)
    }

    pub fn with_policy(key: &str, policy: ChecksumPolicy) -> Self {
        let mut config = RemoteRepoConfig::new(key);
        config.retrieval_cache_period_secs = 3600;
        config.checksum_policy = policy;
        Self::with_config(config)
    }

    pub fn with_config(config: RemoteRepoConfig) -> Self {
        let registry = Arc::new(LockRegistry::with_timeout(Duration::from_secs(2)));
        let store = Arc::new(InMemoryBinaryStore::new());
        let transport = Arc::new(StaticTransport::new());
        let repo = Arc::new(
            CacheRepo::new(
                config,
                registry.clone(),
                Arc::new(ContentStore::new(store.clone())),
                transport.clone(),
            )
            .unwrap(),
        );
        Self {
            registry,
            store,
            transport,
            repo,
        }
    }

    pub fn path(&self, p: &str) -> RepoPath {
        self.repo.repo_path(p)
    }

    /// Commits a cached file refreshed `age` ago.
    pub fn seed_cached(&self, p: &str, age: Duration) -> RepoPath {
        let repo_path = self.path(p);
        let mut info = FileInfo::new(repo_path.clone());
        info.last_updated = now_millis() - age.as_millis() as u64;
        self.registry
            .with_session(|s| s.create(ItemInfo::File(info)).map(|_| ()))
            .unwrap();
        repo_path
    }
}
