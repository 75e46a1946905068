//! Caches derived from repository content that must follow its invalidation.

use std::sync::Arc;

use artivault_core::{RepoPath, RepoResult};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// A cache holding state derived from repository items.
pub trait DependentCache: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Drops every entry derived from `path` or its subtree.
    ///
    /// Returns the number of entries removed.
    fn invalidate(&self, path: &RepoPath) -> RepoResult<usize>;
}

/// The dependent caches of one repository.
#[derive(Default)]
pub struct DependentCacheRegistry {
    caches: RwLock<Vec<Arc<dyn DependentCache>>>,
}

impl DependentCacheRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cache to be invalidated by every zap.
    pub fn register(&self, cache: Arc<dyn DependentCache>) {
        debug!(cache = cache.name(), "dependent cache registered");
        self.caches.write().push(cache);
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// Returns true if no cache is registered.
    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Invalidates `path` in every registered cache and sums the removals.
    ///
    /// A failing cache is logged and skipped.
    pub fn invalidate_all(&self, path: &RepoPath) -> usize {
        let caches: Vec<Arc<dyn DependentCache>> = self.caches.read().clone();
        let mut total = 0;
        for cache in caches {
            match cache.invalidate(path) {
                Ok(n) => total += n,
                Err(e) => {
                    warn!(cache = cache.name(), repo_path = %path, error = %e, "dependent cache invalidation failed");
                }
            }
        }
        total
    }
}

impl std::fmt::Debug for DependentCacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.caches.read().iter().map(|c| c.name().to_string()).collect();
        f.debug_struct("DependentCacheRegistry").field("caches", &names).finish()
    }
}
