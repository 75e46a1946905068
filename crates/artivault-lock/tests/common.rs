//! Common test utilities and fixtures for lock integration tests.

use std::time::Duration;

use artivault_core::{FileInfo, ItemInfo, RepoPath};
use artivault_lock::LockRegistry;

/// Repository key used by every fixture.
pub const REPO: &str = "libs-remote-cache";

/// Registry with a short timeout so contention tests finish quickly.
pub fn fast_registry() -> LockRegistry {
    LockRegistry::with_timeout(Duration::from_millis(100))
}

/// Registry with a generous timeout for tests that expect waiters to succeed.
pub fn patient_registry() -> LockRegistry {
    LockRegistry::with_timeout(Duration::from_secs(5))
}

pub fn path(p: &str) -> RepoPath {
    RepoPath::new(REPO, p)
}

/// Commits a file item at `p`.
pub fn seed_file(registry: &LockRegistry, p: &str) -> RepoPath {
    let repo_path = path(p);
    registry
        .with_session(|s| s.create(ItemInfo::File(FileInfo::new(repo_path.clone()))).map(|_| ()))
        .unwrap();
    repo_path
}
