//! Per-thread virtual file descriptor table.
//!
//! The table maps supervisor-assigned vfds to refcounted [`File`]s. Numbers
//! are allocated monotonically from 3 and never reused, so a stale vfd can
//! never alias a newer file. Tables are shared between threads under
//! `CLONE_FILES` and deep-copied otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ids::Vfd;
use bvisor_shared::errors::BvisorResult;

use super::file::{File, FileRef};

/// One table slot.
#[derive(Clone)]
pub struct FdEntry {
    pub file: FileRef,
    pub cloexec: bool,
}

struct TableInner {
    entries: HashMap<i32, FdEntry>,
    next_vfd: i32,
}

/// Shared, refcounted fd table.
pub type FdTableRef = Arc<FdTable>;

pub struct FdTable {
    inner: Mutex<TableInner>,
}

impl FdTable {
    pub fn new() -> FdTableRef {
        Arc::new(FdTable {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                next_vfd: Vfd::FIRST.0,
            }),
        })
    }

    /// Insert a freshly created file at the next vfd.
    ///
    /// Taking `File` by value guarantees the table holds the only reference.
    pub fn insert(&self, file: File, cloexec: bool) -> Vfd {
        let mut inner = self.inner.lock();
        let vfd = Vfd(inner.next_vfd);
        inner.next_vfd += 1;
        inner.entries.insert(vfd.0, FdEntry {
            file: Arc::new(file),
            cloexec,
        });
        vfd
    }

    /// Insert a freshly created file at a caller-chosen slot.
    ///
    /// The caller must have removed any prior occupant. The allocation
    /// cursor advances past `vfd` so later inserts never collide with it.
    pub fn insert_at(&self, file: File, vfd: Vfd, cloexec: bool) {
        let mut inner = self.inner.lock();
        debug_assert!(!inner.entries.contains_key(&vfd.0), "slot {} occupied", vfd);
        inner.next_vfd = inner.next_vfd.max(vfd.0 + 1);
        inner.entries.insert(vfd.0, FdEntry {
            file: Arc::new(file),
            cloexec,
        });
    }

    /// POSIX dup: a new vfd sharing the same file, cloexec cleared.
    pub fn dup(&self, file: FileRef) -> Vfd {
        let mut inner = self.inner.lock();
        let vfd = Vfd(inner.next_vfd);
        inner.next_vfd += 1;
        inner.entries.insert(vfd.0, FdEntry { file, cloexec: false });
        vfd
    }

    /// dup2/dup3: share the file at a caller-chosen slot.
    ///
    /// The caller must have removed any prior occupant.
    pub fn dup_at(&self, file: FileRef, vfd: Vfd, cloexec: bool) {
        let mut inner = self.inner.lock();
        debug_assert!(!inner.entries.contains_key(&vfd.0), "slot {} occupied", vfd);
        inner.next_vfd = inner.next_vfd.max(vfd.0 + 1);
        inner.entries.insert(vfd.0, FdEntry { file, cloexec });
    }

    /// A new reference to the file at `vfd`, or None when unknown.
    pub fn get(&self, vfd: Vfd) -> Option<FileRef> {
        self.inner.lock().entries.get(&vfd.0).map(|e| e.file.clone())
    }

    /// Like [`FdTable::get`] but also exposes the cloexec flag.
    pub fn get_entry(&self, vfd: Vfd) -> Option<FdEntry> {
        self.inner.lock().entries.get(&vfd.0).cloned()
    }

    /// Drop the table's reference. The backend closes when the last
    /// reference anywhere goes away, not here.
    pub fn remove(&self, vfd: Vfd) -> bool {
        self.inner.lock().entries.remove(&vfd.0).is_some()
    }

    pub fn contains(&self, vfd: Vfd) -> bool {
        self.inner.lock().entries.contains_key(&vfd.0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next vfd the table will hand out. Exposed for invariant checks.
    pub fn next_vfd(&self) -> Vfd {
        Vfd(self.inner.lock().next_vfd)
    }

    /// Independent table for a fork without `CLONE_FILES`.
    ///
    /// Every file is deep-copied and the allocation cursor continues where
    /// this table left off, so parent and child do not hand out colliding
    /// numbers for their first post-fork allocations.
    pub fn clone_table(&self) -> BvisorResult<FdTableRef> {
        let inner = self.inner.lock();
        let mut entries = HashMap::with_capacity(inner.entries.len());
        for (vfd, entry) in &inner.entries {
            entries.insert(*vfd, FdEntry {
                file: Arc::new(entry.file.duplicate()?),
                cloexec: entry.cloexec,
            });
        }
        Ok(Arc::new(FdTable {
            inner: Mutex::new(TableInner {
                entries,
                next_vfd: inner.next_vfd,
            }),
        }))
    }
}
