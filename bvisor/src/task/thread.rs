//! One kernel-visible guest thread.
//!
//! A thread holds strong references to the four structures it participates
//! in (group, namespace, fd table, fs info) and a weak pointer to its parent
//! thread. Containers point back at it weakly, so destruction always starts
//! here: when the registry drops its strong reference the thread unwinds and
//! its containers are freed once their last member goes.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::ids::{AbsTgid, AbsTid, NsTid};
use crate::vfs::FdTableRef;

use super::fs_info::FsInfoRef;
use super::namespace::NamespaceRef;
use super::thread_group::ThreadGroupRef;

pub type ThreadRef = Arc<Thread>;

pub struct Thread {
    tid: AbsTid,
    /// NsTid per namespace level, outermost first. The last entry is the
    /// tid in the thread's own namespace; the length equals that
    /// namespace's depth.
    ns_tids: Vec<NsTid>,
    group: ThreadGroupRef,
    namespace: NamespaceRef,
    fd_table: FdTableRef,
    fs: FsInfoRef,
    parent: Mutex<Option<Weak<Thread>>>,
}

impl Thread {
    pub(crate) fn new(
        tid: AbsTid,
        ns_tids: Vec<NsTid>,
        group: ThreadGroupRef,
        namespace: NamespaceRef,
        fd_table: FdTableRef,
        fs: FsInfoRef,
        parent: Option<&ThreadRef>,
    ) -> ThreadRef {
        debug_assert_eq!(ns_tids.len(), namespace.depth());
        Arc::new(Thread {
            tid,
            ns_tids,
            group,
            namespace,
            fd_table,
            fs,
            parent: Mutex::new(parent.map(Arc::downgrade)),
        })
    }

    pub fn tid(&self) -> AbsTid {
        self.tid
    }

    /// Read through the thread group.
    pub fn tgid(&self) -> AbsTgid {
        self.group.tgid()
    }

    /// Tid as seen from inside the thread's own namespace.
    pub fn ns_tid(&self) -> NsTid {
        *self.ns_tids.last().expect("ns_tids is never empty")
    }

    /// Tid as seen from the namespace at `depth` (1 = sandbox root), or
    /// None when the thread is not visible that far down.
    pub fn ns_tid_at_depth(&self, depth: usize) -> Option<NsTid> {
        if depth == 0 {
            return None;
        }
        self.ns_tids.get(depth - 1).copied()
    }

    pub fn ns_tids(&self) -> &[NsTid] {
        &self.ns_tids
    }

    pub fn group(&self) -> &ThreadGroupRef {
        &self.group
    }

    pub fn namespace(&self) -> &NamespaceRef {
        &self.namespace
    }

    pub fn fd_table(&self) -> &FdTableRef {
        &self.fd_table
    }

    pub fn fs(&self) -> &FsInfoRef {
        &self.fs
    }

    pub fn parent(&self) -> Option<ThreadRef> {
        self.parent.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<&ThreadRef>) {
        *self.parent.lock() = parent.map(Arc::downgrade);
    }

    pub fn is_group_leader(&self) -> bool {
        self.tid.0 == self.group.tgid().0
    }

    /// A thread is its namespace's root iff it has no parent or its parent
    /// lives in a different namespace.
    pub fn is_namespace_root(&self) -> bool {
        match self.parent() {
            None => true,
            Some(parent) => !Arc::ptr_eq(parent.namespace(), &self.namespace),
        }
    }

    /// Signal-delivery visibility: membership in this thread's namespace.
    pub fn can_see(&self, target: &ThreadRef) -> bool {
        self.namespace.contains(target)
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("tgid", &self.tgid())
            .field("ns_tid", &self.ns_tid())
            .field("ns_depth", &self.ns_tids.len())
            .finish()
    }
}
