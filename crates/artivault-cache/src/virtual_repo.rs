//! Aggregating repositories and their resolution cache.
//!
//! A virtual repository resolves a path by asking its members in order. The
//! member that answered is remembered so later requests go straight to it;
//! zapping the member path forgets the resolution.

use std::sync::Arc;

use artivault_core::{RepoError, RepoPath, RepoResult, VirtualRepoConfig};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::controller::CacheRepo;
use crate::dependents::DependentCache;
use crate::resource::RepoResource;

/// Remembers which member path resolved a virtual path.
#[derive(Debug)]
pub struct VirtualResolutionCache {
    name: String,
    resolved: DashMap<RepoPath, RepoPath>,
}

impl VirtualResolutionCache {
    /// Creates an empty cache for the virtual repository `virtual_key`.
    pub fn new(virtual_key: &str) -> Self {
        Self {
            name: format!("virtual-resolution:{}", virtual_key),
            resolved: DashMap::new(),
        }
    }

    /// Records that `member_path` resolved `virtual_path`.
    pub fn record(&self, virtual_path: RepoPath, member_path: RepoPath) {
        self.resolved.insert(virtual_path, member_path);
    }

    /// The member path that last resolved `virtual_path`.
    pub fn resolved(&self, virtual_path: &RepoPath) -> Option<RepoPath> {
        self.resolved.get(virtual_path).map(|m| m.value().clone())
    }

    /// Forgets one resolution.
    pub fn forget(&self, virtual_path: &RepoPath) -> bool {
        self.resolved.remove(virtual_path).is_some()
    }

    /// Number of remembered resolutions.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Returns true if nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

impl DependentCache for VirtualResolutionCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn invalidate(&self, path: &RepoPath) -> RepoResult<usize> {
        let before = self.resolved.len();
        self.resolved
            .retain(|_, member| !member.is_same_or_descendant_of(path));
        Ok(before.saturating_sub(self.resolved.len()))
    }
}

/// A repository that aggregates remote repository caches.
#[derive(Debug)]
pub struct VirtualRepo {
    key: String,
    members: Vec<Arc<CacheRepo>>,
    resolutions: Arc<VirtualResolutionCache>,
}

impl VirtualRepo {
    /// Builds the virtual repository over the members named in `config`.
    ///
    /// Members are looked up in `available` by key and keep their configured
    /// order. The resolution cache is registered as a dependent of each member.
    pub fn new(config: &VirtualRepoConfig, available: &[Arc<CacheRepo>]) -> RepoResult<Self> {
        let resolutions = Arc::new(VirtualResolutionCache::new(&config.key));
        let mut members = Vec::with_capacity(config.repositories.len());
        for member_key in &config.repositories {
            let member = available
                .iter()
                .find(|r| r.key() == member_key.as_str())
                .ok_or_else(|| {
                    RepoError::Config(format!(
                        "virtual repository '{}' member '{}' is not a remote repository",
                        config.key, member_key
                    ))
                })?;
            member.register_dependent(resolutions.clone());
            members.push(member.clone());
        }
        Ok(Self {
            key: config.key.clone(),
            members,
            resolutions,
        })
    }

    /// The repository key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Member keys in resolution order.
    pub fn member_keys(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.key()).collect()
    }

    /// The resolution cache.
    pub fn resolutions(&self) -> &Arc<VirtualResolutionCache> {
        &self.resolutions
    }

    /// Resolves `path` through the members.
    ///
    /// A remembered resolution is tried first; if that member no longer has
    /// the item or fails, the resolution is forgotten and members are asked in
    /// order. Members rejecting the path are skipped. If no member has the
    /// item, the first member failure is returned, or a not-found sentinel.
    pub fn retrieve(&self, path: &str) -> RepoResult<RepoResource> {
        let virtual_path = RepoPath::new(self.key.as_str(), path);

        if let Some(member_path) = self.resolutions.resolved(&virtual_path) {
            if let Some(member) = self.members.iter().find(|m| m.key() == member_path.repo_key()) {
                match member.retrieve(&member_path) {
                    Ok(resource) if resource.is_found() => {
                        debug!(repo_path = %virtual_path, member = member.key(), "resolved from cache");
                        return Ok(resource);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(repo_path = %virtual_path, member = member.key(), error = %e, "resolved member failed, resolving again");
                    }
                }
            }
            self.resolutions.forget(&virtual_path);
        }

        let mut first_error = None;
        for member in &self.members {
            let member_path = member.repo_path(path);
            match member.retrieve(&member_path) {
                Ok(resource) if resource.is_found() => {
                    debug!(repo_path = %virtual_path, member = member.key(), "resolved");
                    self.resolutions.record(virtual_path, member_path);
                    return Ok(resource);
                }
                Ok(_) | Err(RepoError::PathRejected { .. }) => {}
                Err(e) => {
                    warn!(repo_path = %virtual_path, member = member.key(), error = %e, "member failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(RepoResource::not_found(&virtual_path, "not found in any member")),
        }
    }
}
