//! Maven-style path classification.
//!
//! Decides whether a path names a release, a unique (timestamped) snapshot,
//! a non-unique `-SNAPSHOT` artifact or repository metadata. Checksum sidecar
//! files (`.md5`, `.sha1`, `.sha256`) classify as their target.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::ChecksumType;

/// Version suffix of a snapshot.
pub const SNAPSHOT: &str = "-SNAPSHOT";

/// Name of the Maven repository metadata file.
pub const MAVEN_METADATA_NAME: &str = "maven-metadata.xml";

static UNIQUE_SNAPSHOT_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d{8}\.\d{6}-\d+").expect("static regex"));

/// Classification of a repository path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Immutable release version.
    Release,
    /// Snapshot carrying a build timestamp in its file name.
    UniqueSnapshot,
    /// Mutable `-SNAPSHOT` artifact.
    NonUniqueSnapshot,
    /// `maven-metadata.xml` and friends.
    Metadata,
}

impl ArtifactKind {
    /// Unique or non-unique snapshot.
    pub fn is_snapshot(self) -> bool {
        matches!(self, ArtifactKind::UniqueSnapshot | ArtifactKind::NonUniqueSnapshot)
    }
}

/// If `path` names a checksum sidecar, returns the target path and checksum type.
pub fn checksum_target(path: &str) -> Option<(&str, ChecksumType)> {
    let (target, ext) = path.rsplit_once('.')?;
    let checksum_type = ChecksumType::from_extension(ext)?;
    if target.is_empty() || target.ends_with('/') {
        return None;
    }
    Some((target, checksum_type))
}

/// Returns true if `path` names a checksum sidecar file.
pub fn is_checksum(path: &str) -> bool {
    checksum_target(path).is_some()
}

/// Returns true if `path` names Maven repository metadata.
pub fn is_metadata(path: &str) -> bool {
    let path = checksum_target(path).map_or(path, |(t, _)| t);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.starts_with("maven-metadata") && name.ends_with(".xml")
}

/// Classifies a relative repository path.
pub fn classify(path: &str) -> ArtifactKind {
    let path = checksum_target(path).map_or(path, |(t, _)| t);
    if is_metadata(path) {
        return ArtifactKind::Metadata;
    }
    let mut segments = path.rsplit('/');
    let name = segments.next().unwrap_or("");
    let version_dir = segments.next().unwrap_or("");

    if name.contains(SNAPSHOT) {
        return ArtifactKind::NonUniqueSnapshot;
    }
    if version_dir.ends_with(SNAPSHOT) {
        if UNIQUE_SNAPSHOT_FILE.is_match(name) {
            return ArtifactKind::UniqueSnapshot;
        }
        // Anything else inside a snapshot version folder is still snapshot content.
        return ArtifactKind::NonUniqueSnapshot;
    }
    ArtifactKind::Release
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release() {
        assert_eq!(classify("g/a/1.0/a-1.0.jar"), ArtifactKind::Release);
        assert_eq!(classify("g/a/1.0/a-1.0.pom.sha1"), ArtifactKind::Release);
    }

    #[test]
    fn test_non_unique_snapshot() {
        assert_eq!(
            classify("g/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT.jar"),
            ArtifactKind::NonUniqueSnapshot
        );
        assert_eq!(classify("g/a/1.0-SNAPSHOT"), ArtifactKind::NonUniqueSnapshot);
    }

    #[test]
    fn test_unique_snapshot() {
        let path = "g/a/1.0-SNAPSHOT/a-1.0-20240102.030405-7.jar";
        assert_eq!(classify(path), ArtifactKind::UniqueSnapshot);
        assert_eq!(classify(&format!("{}.md5", path)), ArtifactKind::UniqueSnapshot);
        assert!(classify(path).is_snapshot());
    }

    #[test]
    fn test_metadata() {
        assert_eq!(classify("g/a/maven-metadata.xml"), ArtifactKind::Metadata);
        assert_eq!(classify("g/a/maven-metadata.xml.sha1"), ArtifactKind::Metadata);
        assert!(is_metadata("g/a/1.0-SNAPSHOT/maven-metadata-local.xml"));
        assert!(!ArtifactKind::Metadata.is_snapshot());
    }

    #[test]
    fn test_checksum_target() {
        assert_eq!(
            checksum_target("g/a/1.0/a-1.0.jar.sha256"),
            Some(("g/a/1.0/a-1.0.jar", ChecksumType::Sha256))
        );
        assert_eq!(checksum_target("g/a/1.0/a-1.0.jar"), None);
        assert_eq!(checksum_target(".md5"), None);
        assert!(is_checksum("x.md5"));
    }
}
