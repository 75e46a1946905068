//! Content lifecycle on top of a [`BinaryStore`].
//!
//! Several cached items may share one blob, and a blob is written before the
//! item referencing it is committed. [`ContentStore`] pins a digest from the
//! moment its content is stored until the referencing commit is done, and
//! only deletes blobs that are neither pinned nor referenced.

use std::collections::HashMap;
use std::sync::Arc;

use artivault_core::RepoResult;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::collaborators::{BinaryStore, InMemoryBinaryStore};

#[derive(Debug, Default)]
struct Pins {
    counts: HashMap<String, usize>,
    /// Bumped by every delete; lets a writer detect a delete that ran
    /// between its store and its pin.
    deletions: u64,
}

/// A [`BinaryStore`] shared by every cache repository, with digest pinning.
pub struct ContentStore {
    inner: Arc<dyn BinaryStore>,
    pins: Mutex<Pins>,
}

impl ContentStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn BinaryStore>) -> Self {
        Self {
            inner,
            pins: Mutex::new(Pins::default()),
        }
    }

    /// A store backed by an [`InMemoryBinaryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBinaryStore::new()))
    }

    /// Reads the content stored under `digest`.
    pub fn fetch(&self, digest: &str) -> RepoResult<Bytes> {
        self.inner.fetch(digest)
    }

    /// Stores `content` and pins its digest until the returned guard drops.
    ///
    /// The content is guaranteed to be present while the pin is held, even
    /// if a delete of the same digest ran while it was being stored.
    pub fn store_pinned(&self, content: Bytes) -> RepoResult<ContentPin<'_>> {
        let before = self.pins.lock().deletions;
        let digest = self.inner.store(content.clone())?;
        let raced = {
            let mut pins = self.pins.lock();
            *pins.counts.entry(digest.clone()).or_insert(0) += 1;
            pins.deletions != before
        };
        let pin = ContentPin { store: self, digest };
        if raced {
            debug!(digest = %pin.digest, "content deleted while storing, storing again");
            self.inner.store(content)?;
        }
        Ok(pin)
    }

    /// Deletes the blob under `digest` unless it is pinned or `in_use`
    /// reports a reference to it.
    ///
    /// `in_use` runs with the pin table locked, so no writer can pin the
    /// digest between the check and the delete. Returns true if a blob was
    /// deleted.
    pub fn delete_unreferenced(&self, digest: &str, in_use: impl FnOnce(&str) -> bool) -> RepoResult<bool> {
        let mut pins = self.pins.lock();
        if pins.counts.contains_key(digest) || in_use(digest) {
            return Ok(false);
        }
        pins.deletions += 1;
        self.inner.delete(digest)
    }

    /// Returns true if a commit currently holds a pin on `digest`.
    pub fn is_pinned(&self, digest: &str) -> bool {
        self.pins.lock().counts.contains_key(digest)
    }

    fn unpin(&self, digest: &str) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.counts.get_mut(digest) {
            *count -= 1;
            if *count == 0 {
                pins.counts.remove(digest);
            }
        }
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("pinned", &self.pins.lock().counts.len())
            .finish()
    }
}

/// Keeps a stored digest from being deleted. Unpins on drop.
#[derive(Debug)]
pub struct ContentPin<'a> {
    store: &'a ContentStore,
    digest: String,
}

impl ContentPin<'_> {
    /// The pinned digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl Drop for ContentPin<'_> {
    fn drop(&mut self) {
        self.store.unpin(&self.digest);
    }
}
