#![warn(missing_docs)]

//! ArtiVault cache subsystem: remote-repository cache consistency, expiration, zap/unexpire, cleanup
//!
//! [`CacheRepo`] fronts one remote repository with a local cache whose items
//! are guarded by the shared [`artivault_lock::LockRegistry`]. Caches derived
//! from repository content register as [`DependentCache`]s and are
//! invalidated together with the items they derive from.

pub mod cleanup;
pub mod collaborators;
pub mod content;
pub mod controller;
pub mod dependents;
pub mod missed;
pub mod resource;
pub mod virtual_repo;

pub use cleanup::{CacheCleaner, CleanupReport, CleanupState};
pub use collaborators::{
    BinaryStore, InMemoryBinaryStore, OfflineTransport, RemoteContent, RemoteTransport, StaticTransport,
};
pub use content::{ContentPin, ContentStore};
pub use controller::{is_expired, CacheRepo};
pub use dependents::{DependentCache, DependentCacheRegistry};
pub use missed::{MissedRetrievalCache, MissedStats};
pub use resource::RepoResource;
pub use virtual_repo::{VirtualRepo, VirtualResolutionCache};
