// src/recorder/active.rs
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Paths of segments that are Open or Finalizing.
///
/// Pinning and the sweeper's check-then-delete share one lock, so a delete
/// can never interleave with a segment claiming that path.
#[derive(Clone, Default)]
pub struct ActiveFiles {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ActiveFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut g = self.inner.lock();
        for p in paths {
            g.insert(p.into());
        }
    }

    pub fn unpin<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut g = self.inner.lock();
        for p in paths {
            g.remove(p.as_ref());
        }
    }

    pub fn is_pinned(&self, path: &Path) -> bool {
        self.inner.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Runs `delete` only if `path` is not pinned, holding the lock throughout.
    /// Returns `None` when skipped.
    pub fn unless_pinned<T>(&self, path: &Path, delete: impl FnOnce() -> T) -> Option<T> {
        let g = self.inner.lock();
        if g.contains(path) {
            return None;
        }
        Some(delete())
    }
}
