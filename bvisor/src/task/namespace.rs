//! PID namespace node.
//!
//! Namespaces form a tree. Every live thread is registered in its own
//! namespace and in each ancestor, keyed at each level by the NsTid valid at
//! that depth, which is exactly how the kernel exposes nested pid views.
//!
//! The map holds weak references: threads own their namespace, never the
//! other way round, so a namespace dies with its last member's strong chain.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::ids::NsTid;

use super::thread::Thread;

pub type NamespaceRef = Arc<Namespace>;

pub struct Namespace {
    parent: Option<NamespaceRef>,
    threads: Mutex<HashMap<i32, Weak<Thread>>>,
}

impl Namespace {
    /// The sandbox's outermost namespace.
    pub fn new_root() -> NamespaceRef {
        Arc::new(Namespace {
            parent: None,
            threads: Mutex::new(HashMap::new()),
        })
    }

    /// A nested namespace created by `CLONE_NEWPID`.
    pub fn new_child(parent: &NamespaceRef) -> NamespaceRef {
        Arc::new(Namespace {
            parent: Some(parent.clone()),
            threads: Mutex::new(HashMap::new()),
        })
    }

    pub fn parent(&self) -> Option<&NamespaceRef> {
        self.parent.as_ref()
    }

    /// 1 for the sandbox root, parent depth + 1 below it. Equals the length
    /// of the NsTid chain of any thread whose own namespace this is.
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }

    pub fn register(&self, nstid: NsTid, thread: &Arc<Thread>) {
        self.threads.lock().insert(nstid.0, Arc::downgrade(thread));
    }

    pub fn unregister(&self, nstid: NsTid) {
        self.threads.lock().remove(&nstid.0);
    }

    /// The thread visible at this level under `nstid`, if it is still alive.
    pub fn lookup(&self, nstid: NsTid) -> Option<Arc<Thread>> {
        self.threads.lock().get(&nstid.0).and_then(Weak::upgrade)
    }

    /// All live threads visible at this level, descendant namespaces
    /// included.
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.threads
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visibility test: whether `thread` is registered at this level.
    pub fn contains(&self, thread: &Arc<Thread>) -> bool {
        match thread.ns_tid_at_depth(self.depth()) {
            Some(nstid) => self
                .lookup(nstid)
                .is_some_and(|found| Arc::ptr_eq(&found, thread)),
            None => false,
        }
    }
}
