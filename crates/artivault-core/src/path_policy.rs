//! Include/exclude and release/snapshot admission of repository paths.
//!
//! Both predicates are pure and are evaluated before any item lock is taken:
//! a rejected path is not something the repository caches at all.

use glob::{MatchOptions, Pattern};
use tracing::trace;

use crate::error::{RepoError, RepoResult};
use crate::naming::{self, ArtifactKind};

/// Marker of internal bookkeeping paths, always accepted.
pub const SYSTEM_PATH_MARKER: &str = ".artivault-metadata";

/// Suffixes naming the metadata attached to an item, as in `a.jar:properties`.
pub const SYSTEM_METADATA_SUFFIXES: [&str; 2] = [":properties", ":metadata"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Pure admission predicates for one repository.
#[derive(Clone, Debug)]
pub struct PathPolicyMatcher {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
    handle_releases: bool,
    handle_snapshots: bool,
}

impl PathPolicyMatcher {
    /// Builds a matcher from comma-separated Ant-style pattern lists.
    ///
    /// An empty include list means everything is included.
    pub fn new(
        includes: &str,
        excludes: &str,
        handle_releases: bool,
        handle_snapshots: bool,
    ) -> RepoResult<Self> {
        Ok(Self {
            includes: parse_patterns(includes)?,
            excludes: parse_patterns(excludes)?,
            handle_releases,
            handle_snapshots,
        })
    }

    /// A matcher that accepts and handles everything.
    pub fn permissive() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            handle_releases: true,
            handle_snapshots: true,
        }
    }

    /// Include/exclude check. System paths are always accepted.
    pub fn accepts(&self, path: &str) -> bool {
        if is_system_path(path) {
            return true;
        }
        if self.excludes.iter().any(|p| p.matches_with(path, MATCH_OPTIONS)) {
            trace!(path, "path excluded");
            return false;
        }
        if self.includes.is_empty() || path.is_empty() {
            return true;
        }
        let included = self
            .includes
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS) || is_ancestor_of_pattern(path, p));
        if !included {
            trace!(path, "path not included");
        }
        included
    }

    /// Release/snapshot admission. Metadata is handled by either kind of repository.
    pub fn handles(&self, path: &str) -> bool {
        match naming::classify(path) {
            ArtifactKind::Metadata => self.handle_releases || self.handle_snapshots,
            kind if kind.is_snapshot() => self.handle_snapshots,
            _ => self.handle_releases,
        }
    }

    /// Both predicates.
    pub fn admits(&self, path: &str) -> bool {
        self.accepts(path) && self.handles(path)
    }
}

impl Default for PathPolicyMatcher {
    fn default() -> Self {
        Self::permissive()
    }
}

/// Returns true for internal bookkeeping paths.
///
/// Only the last segment decides: either the bookkeeping marker itself or an
/// item name followed by one of the metadata suffixes.
pub fn is_system_path(path: &str) -> bool {
    let Some(name) = path.rsplit('/').next() else {
        return false;
    };
    name.ends_with(SYSTEM_PATH_MARKER)
        || SYSTEM_METADATA_SUFFIXES
            .iter()
            .any(|suffix| name.len() > suffix.len() && name.ends_with(suffix))
}

fn parse_patterns(list: &str) -> RepoResult<Vec<Pattern>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| {
            let mut pattern = raw.trim_start_matches('/').to_string();
            // Ant treats a trailing slash as "everything below".
            if pattern.ends_with('/') {
                pattern.push_str("**");
            }
            Pattern::new(&pattern)
                .map_err(|e| RepoError::Config(format!("invalid path pattern '{}': {}", raw, e)))
        })
        .collect()
}

/// Folders leading to an included subtree must stay browsable.
fn is_ancestor_of_pattern(path: &str, pattern: &Pattern) -> bool {
    let literal: Vec<&str> = pattern
        .as_str()
        .split('/')
        .take_while(|s| !s.contains(['*', '?', '[']))
        .collect();
    let segments: Vec<&str> = path.split('/').collect();
    segments.len() <= literal.len() && segments.iter().zip(&literal).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_accepts_everything() {
        let m = PathPolicyMatcher::permissive();
        assert!(m.accepts("g/a/1.0/a-1.0.jar"));
        assert!(m.handles("g/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT.jar"));
    }

    #[test]
    fn test_includes_and_excludes() {
        let m = PathPolicyMatcher::new("org/apache/**, com/acme/", "**/*-sources.jar", true, true).unwrap();
        assert!(m.accepts("org/apache/commons/1.0/commons-1.0.jar"));
        assert!(m.accepts("com/acme/x/1/x-1.pom"));
        assert!(!m.accepts("net/other/1.0/other-1.0.jar"));
        assert!(!m.accepts("org/apache/commons/1.0/commons-1.0-sources.jar"));
    }

    #[test]
    fn test_ancestor_folders_of_includes_accepted() {
        let m = PathPolicyMatcher::new("org/apache/**", "", true, true).unwrap();
        assert!(m.accepts("org"));
        assert!(m.accepts("org/apache"));
        assert!(!m.accepts("net"));
    }

    #[test]
    fn test_system_paths_always_accepted() {
        let m = PathPolicyMatcher::new("org/**", "**", true, true).unwrap();
        assert!(m.accepts("g/a/.artivault-metadata"));
        assert!(m.accepts("g/a/a.jar:properties"));
        assert!(m.accepts("g/a/a.jar:metadata"));
    }

    #[test]
    fn test_colon_alone_does_not_bypass_excludes() {
        let m = PathPolicyMatcher::new("org/**", "**", true, true).unwrap();
        assert!(!m.accepts("g/a/x:evil.jar"));
        assert!(!m.accepts("g:a/a.jar"));
        assert!(!m.accepts("g/a/:properties"));
        assert!(!m.accepts("g/a/a.jar:properties/b.jar"));
        assert!(!is_system_path("g/a/a.jar:props"));
    }

    #[test]
    fn test_handles_release_snapshot() {
        let releases = PathPolicyMatcher::new("", "", true, false).unwrap();
        assert!(releases.handles("g/a/1.0/a-1.0.jar"));
        assert!(!releases.handles("g/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT.jar"));
        assert!(releases.handles("g/a/maven-metadata.xml"));

        let snapshots = PathPolicyMatcher::new("", "", false, true).unwrap();
        assert!(!snapshots.handles("g/a/1.0/a-1.0.jar"));
        assert!(snapshots.handles("g/a/1.0-SNAPSHOT/a-1.0-20240102.030405-1.jar"));
        assert!(snapshots.handles("g/a/maven-metadata.xml"));
        assert!(!snapshots.admits("g/a/1.0/a-1.0.jar"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = PathPolicyMatcher::new("org/[abc", "", true, true).unwrap_err();
        assert!(matches!(err, RepoError::Config(_)));
    }
}
