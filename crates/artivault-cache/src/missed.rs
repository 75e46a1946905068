//! Negative cache for paths the origin reported as missing.
//!
//! Build tools probe many paths that do not exist remotely. Remembering the
//! misses for a while avoids a round trip to the origin for each probe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use artivault_core::{RepoPath, RepoResult};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::dependents::DependentCache;

/// Missed-retrieval statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MissedStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to go to the origin.
    pub misses: u64,
    /// Misses recorded.
    pub inserts: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
    /// Entries dropped because they outlived the period.
    pub expirations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    invalidations: AtomicU64,
    expirations: AtomicU64,
}

/// Remembers origin misses for the missed-retrieval cache period.
#[derive(Debug)]
pub struct MissedRetrievalCache {
    name: String,
    period: RwLock<Duration>,
    entries: DashMap<RepoPath, Instant>,
    counters: Counters,
}

impl MissedRetrievalCache {
    /// Creates a cache whose entries live for `period`. A zero period disables it.
    pub fn new(repo_key: &str, period: Duration) -> Self {
        Self {
            name: format!("missed-retrieval:{}", repo_key),
            period: RwLock::new(period),
            entries: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Changes the period; existing entries are judged by the new value.
    pub fn set_period(&self, period: Duration) {
        *self.period.write() = period;
    }

    /// Records that the origin does not have `path`.
    pub fn record(&self, path: &RepoPath) {
        if self.period.read().is_zero() {
            return;
        }
        self.entries.insert(path.clone(), Instant::now());
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        trace!(repo_path = %path, "origin miss recorded");
    }

    /// Returns true if the origin recently reported `path` as missing.
    pub fn is_missed(&self, path: &RepoPath) -> bool {
        let period = *self.period.read();
        let expired = match self.entries.get(path) {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            Some(recorded) => recorded.elapsed() > period,
        };
        if expired {
            self.entries.remove(path);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    /// Forgets a single path, e.g. after it was fetched successfully.
    pub fn forget(&self, path: &RepoPath) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Drops entries older than the period.
    pub fn evict_expired(&self) -> usize {
        let period = *self.period.read();
        let before = self.entries.len();
        self.entries.retain(|_, recorded| recorded.elapsed() <= period);
        let evicted = before.saturating_sub(self.entries.len());
        self.counters
            .expirations
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Number of remembered misses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no miss is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> MissedStats {
        let c = &self.counters;
        MissedStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            inserts: c.inserts.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
        }
    }
}

impl DependentCache for MissedRetrievalCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn invalidate(&self, path: &RepoPath) -> RepoResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|p, _| !p.is_same_or_descendant_of(path));
        let removed = before.saturating_sub(self.entries.len());
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> RepoPath {
        RepoPath::new("central", p)
    }

    #[test]
    fn test_record_and_lookup() {
        let cache = MissedRetrievalCache::new("central", Duration::from_secs(60));
        assert!(!cache.is_missed(&path("g/a.pom")));
        cache.record(&path("g/a.pom"));
        assert!(cache.is_missed(&path("g/a.pom")));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[test]
    fn test_zero_period_disables() {
        let cache = MissedRetrievalCache::new("central", Duration::ZERO);
        cache.record(&path("g/a.pom"));
        assert!(cache.is_empty());
        assert!(!cache.is_missed(&path("g/a.pom")));
    }

    #[test]
    fn test_entries_expire() {
        let cache = MissedRetrievalCache::new("central", Duration::from_millis(10));
        cache.record(&path("a"));
        cache.record(&path("b"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.is_missed(&path("a")));
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 2);
    }

    #[test]
    fn test_invalidate_subtree() {
        let cache = MissedRetrievalCache::new("central", Duration::from_secs(60));
        cache.record(&path("g/a/1.0/a.pom"));
        cache.record(&path("g/a/2.0/a.pom"));
        cache.record(&path("g/ab/1.0/ab.pom"));
        assert_eq!(cache.invalidate(&path("g/a")).unwrap(), 2);
        assert_eq!(cache.invalidate(&path("g/a")).unwrap(), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(&RepoPath::root("central")).unwrap(), 1);
    }

    #[test]
    fn test_forget() {
        let cache = MissedRetrievalCache::new("central", Duration::from_secs(60));
        cache.record(&path("a"));
        assert!(cache.forget(&path("a")));
        assert!(!cache.forget(&path("a")));
    }
}
