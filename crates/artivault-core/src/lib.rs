#![warn(missing_docs)]

//! ArtiVault core: repository paths, item metadata, checksum and path policies
//!
//! This crate holds the data model shared by the locking and caching
//! subsystems together with the pure policy objects that decide whether a
//! path belongs to a repository and whether fetched content can be trusted.

pub mod checksum;
pub mod config;
pub mod error;
pub mod naming;
pub mod path_policy;
pub mod types;

pub use checksum::{compute_checksums, ChecksumPolicy, Checksums, Decision};
pub use config::{ArtiVaultConfig, LockConfig, RemoteRepoConfig, VirtualRepoConfig};
pub use error::{RepoError, RepoResult};
pub use naming::{classify, ArtifactKind};
pub use path_policy::PathPolicyMatcher;
pub use types::{now_millis, ChecksumInfo, ChecksumSet, ChecksumType, FileInfo, FolderInfo, ItemInfo, RepoPath};
