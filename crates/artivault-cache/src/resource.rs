//! Result of resolving a path in a repository.

use std::sync::Arc;

use artivault_core::{ItemInfo, RepoPath};

/// A resolved item, or a sentinel explaining why nothing is served.
#[derive(Clone, Debug, PartialEq)]
pub enum RepoResource {
    /// A cached, valid item.
    Found(Arc<ItemInfo>),
    /// Nothing to serve.
    NotFound {
        /// The requested path.
        repo_path: RepoPath,
        /// Why the item is not served.
        reason: String,
        /// The stale metadata, when the item is cached but expired.
        detail: Option<Arc<ItemInfo>>,
    },
}

impl RepoResource {
    pub(crate) fn not_found(repo_path: &RepoPath, reason: impl Into<String>) -> Self {
        RepoResource::NotFound {
            repo_path: repo_path.clone(),
            reason: reason.into(),
            detail: None,
        }
    }

    pub(crate) fn expired(info: Arc<ItemInfo>) -> Self {
        RepoResource::NotFound {
            repo_path: info.repo_path().clone(),
            reason: "cached copy expired".to_string(),
            detail: Some(info),
        }
    }

    /// Returns true for [`RepoResource::Found`].
    pub fn is_found(&self) -> bool {
        matches!(self, RepoResource::Found(_))
    }

    /// Returns true for the sentinel carrying stale metadata.
    pub fn is_expired(&self) -> bool {
        matches!(self, RepoResource::NotFound { detail: Some(_), .. })
    }

    /// The requested path.
    pub fn repo_path(&self) -> &RepoPath {
        match self {
            RepoResource::Found(info) => info.repo_path(),
            RepoResource::NotFound { repo_path, .. } => repo_path,
        }
    }

    /// The served item, if found.
    pub fn info(&self) -> Option<&Arc<ItemInfo>> {
        match self {
            RepoResource::Found(info) => Some(info),
            RepoResource::NotFound { .. } => None,
        }
    }
}
