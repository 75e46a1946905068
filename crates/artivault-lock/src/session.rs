//! Units of work over the lock registry.
//!
//! A [`LockingSession`] records every item it touched together with the lock
//! it holds and the copy it works on. Ending the session (commit, rollback or
//! drop) releases each lock exactly once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use artivault_core::{ItemInfo, RepoError, RepoPath, RepoResult};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::registry::{ItemSlot, LockRegistry, WriteOutcome};

/// Identity of a unit of work.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of lock a session holds on an item.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Shared.
    Read,
    /// Exclusive.
    Write,
}

#[derive(Debug)]
enum EntryState {
    Read {
        snapshot: Arc<ItemInfo>,
    },
    Write {
        working: ItemInfo,
        deleted: bool,
    },
}

/// Per-session record of one touched item.
///
/// Holds either the immutable snapshot read under a shared lock or the
/// private working copy edited under the exclusive lock, never both.
#[derive(Debug)]
pub struct SessionLockEntry {
    slot: Arc<ItemSlot>,
    state: EntryState,
}

impl SessionLockEntry {
    /// The item this entry guards.
    pub fn path(&self) -> &RepoPath {
        self.slot.path()
    }

    /// The lock this entry holds.
    pub fn mode(&self) -> LockMode {
        match self.state {
            EntryState::Read { .. } => LockMode::Read,
            EntryState::Write { .. } => LockMode::Write,
        }
    }

    /// Returns true if the item will be dropped from the cache on release.
    pub fn is_deleted(&self) -> bool {
        matches!(self.state, EntryState::Write { deleted: true, .. })
    }

    /// What this session currently sees for the item.
    pub fn view(&self) -> Option<Arc<ItemInfo>> {
        match &self.state {
            EntryState::Read { snapshot } => Some(snapshot.clone()),
            EntryState::Write { deleted: true, .. } => None,
            EntryState::Write { working, .. } => Some(Arc::new(working.clone())),
        }
    }

    fn release(self, registry: &LockRegistry, session: SessionId, keep: bool) {
        match self.state {
            EntryState::Read { .. } => registry.release_read(&self.slot, session),
            EntryState::Write { working, deleted } => {
                let outcome = match (keep, deleted) {
                    (false, _) => WriteOutcome::Discard,
                    (true, true) => WriteOutcome::Delete,
                    (true, false) => WriteOutcome::Save(working),
                };
                registry.release_write(&self.slot, session, outcome);
            }
        }
    }
}

/// A unit of work holding item locks.
///
/// Dropping a session with locks still held rolls back: working copies are
/// discarded and every lock is released.
pub struct LockingSession<'r> {
    registry: &'r LockRegistry,
    id: SessionId,
    entries: HashMap<RepoPath, SessionLockEntry>,
}

impl<'r> LockingSession<'r> {
    pub(crate) fn new(registry: &'r LockRegistry) -> Self {
        let id = SessionId::new();
        trace!(session = %id, "session started");
        Self {
            registry,
            id,
            entries: HashMap::new(),
        }
    }

    /// The session identity.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The registry this session locks against.
    pub fn registry(&self) -> &'r LockRegistry {
        self.registry
    }

    /// Number of items this session holds a lock on.
    pub fn held(&self) -> usize {
        self.entries.len()
    }

    /// The lock held on `path`, if any.
    pub fn mode(&self, path: &RepoPath) -> Option<LockMode> {
        self.entries.get(path).map(SessionLockEntry::mode)
    }

    /// The entry for `path`, if the session touched it.
    pub fn entry(&self, path: &RepoPath) -> Option<&SessionLockEntry> {
        self.entries.get(path)
    }

    /// Reads `path` under a shared lock.
    ///
    /// Returns `None` without keeping a lock when the item is not cached. If
    /// the session already holds the item, its current view is returned.
    pub fn read(&mut self, path: &RepoPath) -> RepoResult<Option<Arc<ItemInfo>>> {
        if let Some(entry) = self.entries.get(path) {
            return Ok(entry.view());
        }
        let slot = self.registry.slot(path);
        match self.registry.acquire_read(&slot, self.id)? {
            Some(snapshot) => {
                self.entries.insert(
                    path.clone(),
                    SessionLockEntry {
                        slot,
                        state: EntryState::Read {
                            snapshot: snapshot.clone(),
                        },
                    },
                );
                Ok(Some(snapshot))
            }
            None => {
                self.registry.release_read(&slot, self.id);
                Ok(None)
            }
        }
    }

    /// Locks an existing item exclusively and returns its working copy.
    ///
    /// Fails with [`RepoError::LockUpgradeNotSupported`] if this session
    /// already read the item and with [`RepoError::NoSuchItem`] if the item is
    /// neither cached nor being created.
    pub fn write(&mut self, path: &RepoPath) -> RepoResult<&mut ItemInfo> {
        self.write_inner(path, None::<fn() -> ItemInfo>)
    }

    /// Locks `path` exclusively, creating its working copy from `init` if the
    /// item is not cached.
    pub fn write_or_create<F>(&mut self, path: &RepoPath, init: F) -> RepoResult<&mut ItemInfo>
    where
        F: FnOnce() -> ItemInfo,
    {
        self.write_inner(path, Some(init))
    }

    /// Locks the item's path exclusively and replaces its working copy with `info`.
    pub fn create(&mut self, info: ItemInfo) -> RepoResult<&mut ItemInfo> {
        let path = info.repo_path().clone();
        let working = self.write_inner(&path, Some(|| info.clone()))?;
        *working = info;
        Ok(working)
    }

    /// Marks `path` for removal from the cache when the session commits.
    pub fn mark_deleted(&mut self, path: &RepoPath) -> RepoResult<()> {
        self.write(path)?;
        if let Some(SessionLockEntry {
            state: EntryState::Write { deleted, .. },
            ..
        }) = self.entries.get_mut(path)
        {
            *deleted = true;
        }
        Ok(())
    }

    /// Releases the lock on `path` now, saving a working copy.
    ///
    /// Returns false if the session held no lock on `path`.
    pub fn release(&mut self, path: &RepoPath) -> bool {
        self.release_one(path, true)
    }

    /// Releases the lock on `path` now, discarding a working copy.
    pub fn discard(&mut self, path: &RepoPath) -> bool {
        self.release_one(path, false)
    }

    /// Releases all read locks early, keeping write locks.
    pub fn release_reads(&mut self) -> usize {
        let reads: Vec<RepoPath> = self
            .entries
            .iter()
            .filter(|(_, e)| e.mode() == LockMode::Read)
            .map(|(p, _)| p.clone())
            .collect();
        for path in &reads {
            self.release_one(path, true);
        }
        reads.len()
    }

    /// Saves every working copy and releases every lock.
    pub fn commit(mut self) -> usize {
        let released = self.release_all(true);
        trace!(session = %self.id, released, "session committed");
        released
    }

    /// Discards every working copy and releases every lock.
    pub fn rollback(mut self) -> usize {
        let released = self.release_all(false);
        trace!(session = %self.id, released, "session rolled back");
        released
    }

    fn write_inner<F>(&mut self, path: &RepoPath, init: Option<F>) -> RepoResult<&mut ItemInfo>
    where
        F: FnOnce() -> ItemInfo,
    {
        if let Some(entry) = self.entries.get(path) {
            if entry.mode() == LockMode::Read {
                return Err(RepoError::LockUpgradeNotSupported {
                    path: path.clone(),
                    session: self.id.to_string(),
                });
            }
        } else {
            let slot = self.registry.slot(path);
            let base = self.registry.acquire_write(&slot, self.id, init.is_some())?;
            let (working, deleted) = match base {
                Some(snapshot) => ((*snapshot).clone(), false),
                // Locked for creation; the placeholder is replaced below.
                None => (ItemInfo::Folder(artivault_core::FolderInfo::new(path.clone())), true),
            };
            self.entries.insert(
                path.clone(),
                SessionLockEntry {
                    slot,
                    state: EntryState::Write { working, deleted },
                },
            );
        }

        let Some(SessionLockEntry {
            state: EntryState::Write { working, deleted },
            ..
        }) = self.entries.get_mut(path)
        else {
            return Err(RepoError::NoSuchItem(path.clone()));
        };
        if *deleted {
            match init {
                Some(init) => {
                    *working = init();
                    *deleted = false;
                }
                None => return Err(RepoError::NoSuchItem(path.clone())),
            }
        }
        Ok(working)
    }

    fn release_one(&mut self, path: &RepoPath, keep: bool) -> bool {
        match self.entries.remove(path) {
            Some(entry) => {
                entry.release(self.registry, self.id, keep);
                true
            }
            None => false,
        }
    }

    fn release_all(&mut self, keep: bool) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.release(self.registry, self.id, keep);
        }
        count
    }
}

impl Drop for LockingSession<'_> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let released = self.release_all(false);
            debug!(session = %self.id, released, "session dropped with locks held, rolled back");
        }
    }
}

impl fmt::Debug for LockingSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockingSession")
            .field("id", &self.id)
            .field("held", &self.entries.len())
            .finish()
    }
}
