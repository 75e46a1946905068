//! Periodic eviction of expired cached files.
//!
//! The cleaner's lifecycle is a [`GuardedStateMachine`]:
//!
//! ```text
//! Idle ──run_once──▶ Running ──done──▶ Idle
//!                       │                ▲
//!                  request_stop          │
//!                       ▼                │
//!                    Stopping ────done───┘
//! ```
//!
//! Each run carries its own number, so a second `run_once` while one is in
//! progress is an invalid `Running → Running` transition rather than a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use artivault_core::{RepoError, RepoResult};
use artivault_lock::{GuardedStateMachine, State};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::CacheRepo;

/// Lifecycle of the cache cleaner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupState {
    /// Waiting for the next run.
    Idle,
    /// Evicting; carries the run number.
    Running(u64),
    /// A stop was requested for the run in progress.
    Stopping(u64),
}

impl State for CleanupState {
    fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (CleanupState::Idle, CleanupState::Running(_)) => true,
            (CleanupState::Running(a), CleanupState::Stopping(b)) => a == b,
            (CleanupState::Running(_), CleanupState::Idle) => true,
            (CleanupState::Stopping(_), CleanupState::Idle) => true,
            _ => false,
        }
    }
}

/// Outcome of one cleanup run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Expired files found.
    pub scanned: usize,
    /// Files evicted.
    pub evicted: usize,
    /// Files that could not be evicted.
    pub failed: usize,
    /// The run ended because a stop was requested.
    pub stopped_early: bool,
    /// Wall time of the run in milliseconds.
    pub elapsed_ms: u64,
}

impl CleanupReport {
    /// The report as one line of JSON, for the daemon log.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Evicts expired files from a set of cache repositories.
#[derive(Debug)]
pub struct CacheCleaner {
    repos: Vec<Arc<CacheRepo>>,
    machine: GuardedStateMachine<CleanupState>,
    runs: AtomicU64,
}

impl CacheCleaner {
    /// Creates an idle cleaner over `repos`.
    pub fn new(repos: Vec<Arc<CacheRepo>>) -> Self {
        Self {
            repos,
            machine: GuardedStateMachine::new("cache-cleaner", CleanupState::Idle, Duration::from_secs(30)),
            runs: AtomicU64::new(0),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> CleanupState {
        self.machine.current_state()
    }

    /// Runs one cleanup pass over every repository.
    ///
    /// Fails with [`RepoError::InvalidTransition`] unless the cleaner is idle.
    pub fn run_once(&self) -> RepoResult<CleanupReport> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.machine.transition_to(CleanupState::Running(run), false)?;
        info!(run, repos = self.repos.len(), "cache cleanup started");

        let started = Instant::now();
        let mut report = CleanupReport::default();
        'repos: for repo in &self.repos {
            for path in repo.expired_paths() {
                if matches!(self.machine.current_state(), CleanupState::Stopping(_)) {
                    report.stopped_early = true;
                    break 'repos;
                }
                report.scanned += 1;
                match repo.evict(&path) {
                    Ok(true) => report.evicted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(repo_path = %path, error = %e, "cleanup could not evict item");
                        report.failed += 1;
                    }
                }
            }
            repo.missed_cache().evict_expired();
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        self.machine.transition_to(CleanupState::Idle, false)?;
        info!(
            run,
            evicted = report.evicted,
            failed = report.failed,
            stopped_early = report.stopped_early,
            elapsed_ms = report.elapsed_ms,
            "cache cleanup finished"
        );
        Ok(report)
    }

    /// Asks a running cleanup to stop after the current item.
    ///
    /// Returns false if no cleanup is running.
    pub fn request_stop(&self) -> RepoResult<bool> {
        let CleanupState::Running(run) = self.machine.current_state() else {
            return Ok(matches!(self.machine.current_state(), CleanupState::Stopping(_)));
        };
        match self.machine.transition_to(CleanupState::Stopping(run), false) {
            Ok(_) => {
                debug!(run, "cache cleanup stop requested");
                Ok(true)
            }
            // The run finished between the read and the transition.
            Err(RepoError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Blocks until the cleaner is idle.
    pub fn await_idle(&self, timeout: Duration) -> RepoResult<()> {
        self.machine
            .wait_until(|s| *s == CleanupState::Idle, timeout)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{RemoteContent, StaticTransport};
    use crate::content::ContentStore;
    use artivault_core::RemoteRepoConfig;
    use artivault_lock::LockRegistry;

    fn repo_with_expired(n: usize) -> Arc<CacheRepo> {
        let transport = Arc::new(StaticTransport::new());
        let repo = CacheRepo::new(
            RemoteRepoConfig::new("central"),
            Arc::new(LockRegistry::default()),
            Arc::new(ContentStore::in_memory()),
            transport.clone(),
        )
        .unwrap();
        for i in 0..n {
            let p = format!("g/a/1.0-SNAPSHOT/a-{}-SNAPSHOT.jar", i);
            transport.insert(&p, RemoteContent::with_valid_checksums(format!("content-{}", i).into_bytes()));
            repo.retrieve(&repo.repo_path(&p)).unwrap();
        }
        repo.zap(&repo.repo_path("g"));
        Arc::new(repo)
    }

    #[test]
    fn test_transitions() {
        use CleanupState::*;
        assert!(Idle.can_transition_to(&Running(1)));
        assert!(Running(1).can_transition_to(&Stopping(1)));
        assert!(!Running(1).can_transition_to(&Stopping(2)));
        assert!(!Running(1).can_transition_to(&Running(2)));
        assert!(Stopping(1).can_transition_to(&Idle));
        assert!(!Idle.can_transition_to(&Stopping(1)));
    }

    #[test]
    fn test_run_once_evicts_and_returns_to_idle() {
        let repo = repo_with_expired(3);
        let cleaner = CacheCleaner::new(vec![repo.clone()]);
        let report = cleaner.run_once().unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.evicted, 3);
        assert!(!report.stopped_early);
        assert_eq!(cleaner.state(), CleanupState::Idle);
        assert!(repo.expired_paths().is_empty());

        let again = cleaner.run_once().unwrap();
        assert_eq!(again.evicted, 0);
    }

    #[test]
    fn test_report_as_json() {
        let repo = repo_with_expired(2);
        let report = CacheCleaner::new(vec![repo]).run_once().unwrap();
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["scanned"], 2);
        assert_eq!(json["evicted"], 2);
        assert_eq!(json["failed"], 0);
        assert_eq!(json["stopped_early"], false);
        assert!(json["elapsed_ms"].is_u64());
    }

    #[test]
    fn test_request_stop_when_idle() {
        let cleaner = CacheCleaner::new(Vec::new());
        assert!(!cleaner.request_stop().unwrap());
        assert_eq!(cleaner.state(), CleanupState::Idle);
        cleaner.await_idle(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_second_run_refused_while_running() {
        let cleaner = CacheCleaner::new(Vec::new());
        cleaner
            .machine
            .transition_to(CleanupState::Running(99), false)
            .unwrap();
        assert!(matches!(cleaner.run_once(), Err(RepoError::InvalidTransition { .. })));
        assert!(cleaner.request_stop().unwrap());
        assert_eq!(cleaner.state(), CleanupState::Stopping(99));
        assert!(cleaner.await_idle(Duration::from_millis(20)).is_err());
    }
}
