//! Per-item read/write locks and committed snapshots.
//!
//! The registry is an arena keyed by [`RepoPath`]. Each slot holds the lock
//! state of one item (reader count, owning writer session) and the last
//! committed immutable snapshot of its metadata. Sessions hold `Arc` handles
//! to slots; slots never point back at sessions.
//!
//! Lock state per item:
//! - Unlocked → ReadLocked(n): any number of readers while no writer.
//! - Unlocked → WriteLocked: one writer, no readers.
//! - WriteLocked → Unlocked: on release; the writer's working copy replaces
//!   the snapshot (skipped when identical) or the snapshot is dropped if the
//!   item was deleted.
//!
//! Every acquisition waits at most the configured timeout and leaves no trace
//! when it fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use artivault_core::{ItemInfo, LockConfig, RepoError, RepoPath, RepoResult};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::session::{LockingSession, SessionId};

#[derive(Debug, Default)]
struct SlotState {
    readers: usize,
    writer: Option<SessionId>,
}

impl SlotState {
    fn is_free(&self) -> bool {
        self.readers == 0 && self.writer.is_none()
    }
}

/// Lock state and committed snapshot of one item.
#[derive(Debug)]
pub(crate) struct ItemSlot {
    path: RepoPath,
    state: Mutex<SlotState>,
    released: Condvar,
    snapshot: RwLock<Option<Arc<ItemInfo>>>,
}

impl ItemSlot {
    fn new(path: RepoPath) -> Self {
        Self {
            path,
            state: Mutex::new(SlotState::default()),
            released: Condvar::new(),
            snapshot: RwLock::new(None),
        }
    }

    pub(crate) fn path(&self) -> &RepoPath {
        &self.path
    }

    pub(crate) fn snapshot(&self) -> Option<Arc<ItemInfo>> {
        self.snapshot.read().clone()
    }

    fn is_vacant(&self) -> bool {
        self.state.lock().is_free() && self.snapshot.read().is_none()
    }
}

/// What happens to a write-locked item on release.
#[derive(Debug)]
pub(crate) enum WriteOutcome {
    /// Replace the snapshot with this copy unless identical.
    Save(ItemInfo),
    /// Drop the cached snapshot.
    Delete,
    /// Keep the snapshot untouched.
    Discard,
}

/// Counters exposed for observability.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Read locks granted.
    pub read_acquisitions: u64,
    /// Write locks granted.
    pub write_acquisitions: u64,
    /// Acquisitions that had to wait.
    pub contended: u64,
    /// Acquisitions that timed out.
    pub timeouts: u64,
    /// Snapshots replaced on release.
    pub saves: u64,
    /// Releases whose working copy equalled the snapshot.
    pub skipped_saves: u64,
    /// Snapshots dropped because the item was deleted.
    pub deletions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    read_acquisitions: AtomicU64,
    write_acquisitions: AtomicU64,
    contended: AtomicU64,
    timeouts: AtomicU64,
    saves: AtomicU64,
    skipped_saves: AtomicU64,
    deletions: AtomicU64,
}

/// Registry of per-item locks and committed snapshots.
///
/// Constructed explicitly and shared by reference (usually behind an `Arc`)
/// with every component that touches cached items.
#[derive(Debug)]
pub struct LockRegistry {
    slots: DashMap<RepoPath, Arc<ItemSlot>>,
    lock_timeout: Duration,
    counters: Counters,
}

impl LockRegistry {
    /// Creates a registry using the configured lock timeout.
    pub fn new(config: &LockConfig) -> Self {
        Self::with_timeout(config.timeout())
    }

    /// Creates a registry with an explicit lock timeout.
    pub fn with_timeout(lock_timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            lock_timeout,
            counters: Counters::default(),
        }
    }

    /// The bounded wait applied to every acquisition.
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Starts a unit of work.
    pub fn session(&self) -> LockingSession<'_> {
        LockingSession::new(self)
    }

    /// Runs `f` in a fresh session, committing on `Ok` and rolling back on `Err`.
    ///
    /// Every lock taken inside `f` is released exactly once on both paths.
    pub fn with_session<T, F>(&self, f: F) -> RepoResult<T>
    where
        F: FnOnce(&mut LockingSession<'_>) -> RepoResult<T>,
    {
        let mut session = self.session();
        match f(&mut session) {
            Ok(value) => {
                session.commit();
                Ok(value)
            }
            Err(err) => {
                debug!(session = %session.id(), error = %err, "unit of work failed, rolling back");
                session.rollback();
                Err(err)
            }
        }
    }

    /// Lock-free read of the last committed snapshot.
    ///
    /// Never observes a partially written item: working copies are private to
    /// their writer until release swaps the snapshot.
    pub fn snapshot(&self, path: &RepoPath) -> Option<Arc<ItemInfo>> {
        self.slots.get(path).and_then(|slot| slot.snapshot())
    }

    /// Returns true if a committed snapshot exists.
    pub fn contains(&self, path: &RepoPath) -> bool {
        self.snapshot(path).is_some()
    }

    /// Number of items with a committed snapshot.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.snapshot.read().is_some()).count()
    }

    /// Returns true if no item has a committed snapshot.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed items equal to or below `root`, sorted.
    pub fn paths_under(&self, root: &RepoPath) -> Vec<RepoPath> {
        let mut paths: Vec<RepoPath> = self
            .slots
            .iter()
            .filter(|s| s.key().is_same_or_descendant_of(root) && s.snapshot.read().is_some())
            .map(|s| s.key().clone())
            .collect();
        paths.sort();
        paths
    }

    /// Returns true if any committed snapshot satisfies `predicate`.
    pub fn any_snapshot<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&ItemInfo) -> bool,
    {
        self.slots
            .iter()
            .any(|s| s.snapshot.read().as_deref().is_some_and(&mut predicate))
    }

    /// Total read and write locks currently held.
    pub fn held_locks(&self) -> usize {
        self.slots
            .iter()
            .map(|s| {
                let st = s.state.lock();
                st.readers + usize::from(st.writer.is_some())
            })
            .sum()
    }

    /// Number of readers currently holding `path`.
    pub fn reader_count(&self, path: &RepoPath) -> usize {
        self.slots.get(path).map_or(0, |s| s.state.lock().readers)
    }

    /// Returns true if some session holds the write lock on `path`.
    pub fn is_write_locked(&self, path: &RepoPath) -> bool {
        self.slots
            .get(path)
            .is_some_and(|s| s.state.lock().writer.is_some())
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> RegistryStats {
        let c = &self.counters;
        RegistryStats {
            read_acquisitions: c.read_acquisitions.load(Ordering::Relaxed),
            write_acquisitions: c.write_acquisitions.load(Ordering::Relaxed),
            contended: c.contended.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            saves: c.saves.load(Ordering::Relaxed),
            skipped_saves: c.skipped_saves.load(Ordering::Relaxed),
            deletions: c.deletions.load(Ordering::Relaxed),
        }
    }

    /// Drops slots that hold neither a lock nor a snapshot and that no session references.
    pub fn evict_idle(&self) -> usize {
        let before = self.slots.len();
        // The shard lock is held during retain, so no new handle can be taken
        // out of a slot between the reference-count check and its removal.
        self.slots
            .retain(|_, slot| Arc::strong_count(slot) > 1 || !slot.is_vacant());
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            debug!(evicted, "evicted idle lock slots");
        }
        evicted
    }

    pub(crate) fn slot(&self, path: &RepoPath) -> Arc<ItemSlot> {
        self.slots
            .entry(path.clone())
            .or_insert_with(|| Arc::new(ItemSlot::new(path.clone())))
            .value()
            .clone()
    }

    /// Takes a shared lock. Returns the committed snapshot at acquisition time.
    pub(crate) fn acquire_read(&self, slot: &ItemSlot, session: SessionId) -> RepoResult<Option<Arc<ItemInfo>>> {
        let mut st = slot.state.lock();
        if st.writer.is_some() {
            self.wait_for(slot, &mut st, session, "read", |s| s.writer.is_none())?;
        }
        st.readers += 1;
        self.counters.read_acquisitions.fetch_add(1, Ordering::Relaxed);
        trace!(repo_path = %slot.path, session = %session, readers = st.readers, "read lock acquired");
        Ok(slot.snapshot())
    }

    /// Takes the exclusive lock.
    ///
    /// Returns the committed snapshot the working copy derives from. Without
    /// `allow_create`, an item with no snapshot fails with
    /// [`RepoError::NoSuchItem`] and the lock is not taken.
    pub(crate) fn acquire_write(
        &self,
        slot: &ItemSlot,
        session: SessionId,
        allow_create: bool,
    ) -> RepoResult<Option<Arc<ItemInfo>>> {
        let mut st = slot.state.lock();
        if !st.is_free() {
            self.wait_for(slot, &mut st, session, "write", SlotState::is_free)?;
        }
        let base = slot.snapshot();
        if base.is_none() && !allow_create {
            return Err(RepoError::NoSuchItem(slot.path.clone()));
        }
        st.writer = Some(session);
        self.counters.write_acquisitions.fetch_add(1, Ordering::Relaxed);
        trace!(repo_path = %slot.path, session = %session, creating = base.is_none(), "write lock acquired");
        Ok(base)
    }

    pub(crate) fn release_read(&self, slot: &ItemSlot, session: SessionId) {
        let mut st = slot.state.lock();
        if st.readers == 0 {
            warn!(repo_path = %slot.path, session = %session, "read lock released but not held");
            return;
        }
        st.readers -= 1;
        trace!(repo_path = %slot.path, session = %session, readers = st.readers, "read lock released");
        if st.readers == 0 {
            slot.released.notify_all();
        }
    }

    pub(crate) fn release_write(&self, slot: &ItemSlot, session: SessionId, outcome: WriteOutcome) {
        let mut st = slot.state.lock();
        if st.writer != Some(session) {
            warn!(repo_path = %slot.path, session = %session, "write lock released by a session that does not own it");
            return;
        }
        match outcome {
            WriteOutcome::Save(working) => {
                let mut snapshot = slot.snapshot.write();
                if snapshot.as_deref() == Some(&working) {
                    self.counters.skipped_saves.fetch_add(1, Ordering::Relaxed);
                    trace!(repo_path = %slot.path, "working copy unchanged, save skipped");
                } else {
                    *snapshot = Some(Arc::new(working));
                    self.counters.saves.fetch_add(1, Ordering::Relaxed);
                    debug!(repo_path = %slot.path, session = %session, "snapshot saved");
                }
            }
            WriteOutcome::Delete => {
                if slot.snapshot.write().take().is_some() {
                    self.counters.deletions.fetch_add(1, Ordering::Relaxed);
                    debug!(repo_path = %slot.path, session = %session, "snapshot dropped");
                }
            }
            WriteOutcome::Discard => {
                trace!(repo_path = %slot.path, session = %session, "working copy discarded");
            }
        }
        st.writer = None;
        slot.released.notify_all();
    }

    fn wait_for<F>(
        &self,
        slot: &ItemSlot,
        st: &mut parking_lot::MutexGuard<'_, SlotState>,
        session: SessionId,
        mode: &str,
        mut ready: F,
    ) -> RepoResult<()>
    where
        F: FnMut(&SlotState) -> bool,
    {
        self.counters.contended.fetch_add(1, Ordering::Relaxed);
        debug!(repo_path = %slot.path, session = %session, mode, "waiting for lock");
        let deadline = Instant::now() + self.lock_timeout;
        while !ready(&**st) {
            if slot.released.wait_until(st, deadline).timed_out() && !ready(&**st) {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(repo_path = %slot.path, session = %session, mode, timeout = ?self.lock_timeout, "lock acquisition timed out");
                return Err(RepoError::timeout(
                    format!("{} lock on {}", mode, slot.path),
                    self.lock_timeout,
                ));
            }
        }
        Ok(())
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(&LockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artivault_core::{FileInfo, FolderInfo};

    fn registry() -> LockRegistry {
        LockRegistry::with_timeout(Duration::from_millis(50))
    }

    fn file(path: &str) -> ItemInfo {
        ItemInfo::File(FileInfo::new(RepoPath::new("libs", path)))
    }

    fn seed(reg: &LockRegistry, info: ItemInfo) {
        reg.with_session(|s| s.create(info).map(|_| ())).unwrap();
    }

    #[test]
    fn test_seeded_item_visible() {
        let reg = registry();
        let path = RepoPath::new("libs", "a/b.jar");
        assert!(!reg.contains(&path));
        seed(&reg, file("a/b.jar"));
        assert!(reg.contains(&path));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.held_locks(), 0);
        assert_eq!(reg.stats().saves, 1);
    }

    #[test]
    fn test_write_on_missing_item_is_no_such_item() {
        let reg = registry();
        let path = RepoPath::new("libs", "missing.jar");
        let mut session = reg.session();
        match session.write(&path) {
            Err(RepoError::NoSuchItem(p)) => assert_eq!(p, path),
            other => panic!("expected NoSuchItem, got {:?}", other.map(|_| ())),
        }
        assert_eq!(session.held(), 0);
        assert_eq!(reg.held_locks(), 0);
    }

    #[test]
    fn test_identical_save_skipped() {
        let reg = registry();
        let path = RepoPath::new("libs", "a.jar");
        seed(&reg, file("a.jar"));
        let before = reg.snapshot(&path).unwrap();
        reg.with_session(|s| s.write(&path).map(|_| ())).unwrap();
        let after = reg.snapshot(&path).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(reg.stats().skipped_saves, 1);
    }

    #[test]
    fn test_modified_save_replaces_snapshot() {
        let reg = registry();
        let path = RepoPath::new("libs", "a.jar");
        seed(&reg, file("a.jar"));
        reg.with_session(|s| {
            if let Some(f) = s.write(&path)?.as_file_mut() {
                f.size = 42;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(reg.snapshot(&path).unwrap().as_file().unwrap().size, 42);
        assert_eq!(reg.stats().saves, 2);
    }

    #[test]
    fn test_paths_under() {
        let reg = registry();
        seed(&reg, ItemInfo::Folder(FolderInfo::new(RepoPath::new("libs", "g"))));
        seed(&reg, file("g/a/1.0/a-1.0.jar"));
        seed(&reg, file("g/b/1.0/b-1.0.jar"));
        seed(&reg, file("gx/c.jar"));
        let under = reg.paths_under(&RepoPath::new("libs", "g"));
        assert_eq!(
            under,
            vec![
                RepoPath::new("libs", "g"),
                RepoPath::new("libs", "g/a/1.0/a-1.0.jar"),
                RepoPath::new("libs", "g/b/1.0/b-1.0.jar"),
            ]
        );
        assert_eq!(reg.paths_under(&RepoPath::root("libs")).len(), 4);
        assert!(reg.paths_under(&RepoPath::root("other")).is_empty());
    }

    #[test]
    fn test_evict_idle_keeps_cached_and_referenced_slots() {
        let reg = registry();
        seed(&reg, file("kept.jar"));
        // A failed write leaves an empty slot behind.
        let missing = RepoPath::new("libs", "missing.jar");
        assert!(reg.session().write(&missing).is_err());
        assert_eq!(reg.evict_idle(), 1);
        assert_eq!(reg.evict_idle(), 0);
        assert!(reg.contains(&RepoPath::new("libs", "kept.jar")));
    }

    #[test]
    fn test_release_write_by_non_owner_is_ignored() {
        let reg = registry();
        let path = RepoPath::new("libs", "a.jar");
        seed(&reg, file("a.jar"));
        let slot = reg.slot(&path);
        let owner = SessionId::new();
        reg.acquire_write(&slot, owner, false).unwrap();
        reg.release_write(&slot, SessionId::new(), WriteOutcome::Delete);
        assert!(reg.is_write_locked(&path));
        reg.release_write(&slot, owner, WriteOutcome::Discard);
        assert!(!reg.is_write_locked(&path));
        assert!(reg.contains(&path));
    }

    #[test]
    fn test_write_timeout_leaves_no_holder() {
        let reg = registry();
        let path = RepoPath::new("libs", "a.jar");
        seed(&reg, file("a.jar"));
        let slot = reg.slot(&path);
        let reader = SessionId::new();
        reg.acquire_read(&slot, reader).unwrap();

        let err = reg.acquire_write(&slot, SessionId::new(), false).unwrap_err();
        assert!(matches!(err, RepoError::LockTimeout { .. }));
        assert_eq!(reg.held_locks(), 1);
        assert_eq!(reg.stats().timeouts, 1);

        reg.release_read(&slot, reader);
        assert_eq!(reg.held_locks(), 0);
    }
}
