//! Error types shared by the repository subsystems.

use std::time::Duration;

use thiserror::Error;

use crate::types::RepoPath;

/// Result type alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Error variants for repository locking, caching and policy checks.
///
/// Timeouts and locking-discipline violations are separate variants so a
/// caller handling an expected timeout cannot swallow a concurrency bug.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A lock or wait did not complete within the configured window.
    #[error("Timed out after {waited:?} waiting for {what}")]
    LockTimeout {
        /// What was being waited on.
        what: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A write lock was requested while the session holds a read lock on the item.
    #[error("Cannot acquire write lock on {path}: session {session} holds a read lock (upgrade is not supported)")]
    LockUpgradeNotSupported {
        /// The item being locked.
        path: RepoPath,
        /// The offending session.
        session: String,
    },

    /// The exclusive guard was requested by the thread that already holds it.
    #[error("Exclusive guard on {what} is already held by the current thread")]
    AlreadyLocked {
        /// Name of the guarded resource.
        what: String,
    },

    /// A state change not allowed by the transition relation.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// A wait was interrupted before the awaited condition held.
    #[error("Wait on {what} was interrupted")]
    Interrupted {
        /// What was being waited on.
        what: String,
    },

    /// Content failed the active checksum policy and was not cached.
    #[error("Checksum rejected for {path}: {reason}")]
    ChecksumRejected {
        /// The item whose content was rejected.
        path: RepoPath,
        /// Policy explanation.
        reason: String,
    },

    /// A write lock was requested for an item that has no snapshot and is not being created.
    #[error("No such item: {0}")]
    NoSuchItem(RepoPath),

    /// The path was rejected by the repository's include/exclude or handling policy.
    #[error("Path {path} rejected: {reason}")]
    PathRejected {
        /// The rejected path.
        path: RepoPath,
        /// Why it was rejected.
        reason: String,
    },

    /// The origin or content store has no such resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote transport failed.
    #[error("Transport error for {path}: {reason}")]
    Transport {
        /// The requested path.
        path: RepoPath,
        /// Description of the failure.
        reason: String,
    },

    /// The binary content store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// Returns true for failures a caller may retry (timeouts and transport hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::LockTimeout { .. } | RepoError::Transport { .. })
    }

    /// Returns true for locking-discipline and state-machine misuse.
    ///
    /// These indicate a bug in the caller and must not be retried.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            RepoError::LockUpgradeNotSupported { .. }
                | RepoError::AlreadyLocked { .. }
                | RepoError::InvalidTransition { .. }
        )
    }

    /// Builds a [`RepoError::LockTimeout`].
    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        RepoError::LockTimeout {
            what: what.into(),
            waited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        let err = RepoError::timeout("write lock on libs:a/b", Duration::from_secs(3));
        assert!(err.is_transient());
        assert!(!err.is_programming_error());
        assert!(format!("{}", err).contains("libs:a/b"));
    }

    #[test]
    fn test_upgrade_is_programming_error() {
        let err = RepoError::LockUpgradeNotSupported {
            path: RepoPath::new("libs", "g/a/1.0/a-1.0.jar"),
            session: "s-1".to_string(),
        };
        assert!(err.is_programming_error());
        assert!(!err.is_transient());
        let msg = format!("{}", err);
        assert!(msg.contains("libs:g/a/1.0/a-1.0.jar"));
        assert!(msg.contains("upgrade is not supported"));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = RepoError::InvalidTransition {
            from: "Idle".to_string(),
            to: "Stopping".to_string(),
        };
        assert_eq!(format!("{}", err), "Invalid transition from Idle to Stopping");
        assert!(err.is_programming_error());
    }

    #[test]
    fn test_no_such_item() {
        let err = RepoError::NoSuchItem(RepoPath::new("remote-cache", "x/y"));
        assert_eq!(format!("{}", err), "No such item: remote-cache:x/y");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_error_from_std() {
        let std_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RepoError = std_err.into();
        assert!(matches!(err, RepoError::Io(_)));
    }
}
