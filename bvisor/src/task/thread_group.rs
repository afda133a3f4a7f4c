//! Thread group: the set of threads sharing one address space and signal
//! disposition, i.e. one POSIX process.
//!
//! The member whose tid equals the group's tgid is the leader. As with
//! namespaces, the member map is weak; members own the group.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::ids::{AbsTgid, AbsTid};

use super::thread::Thread;

pub type ThreadGroupRef = Arc<ThreadGroup>;

pub struct ThreadGroup {
    tgid: AbsTgid,
    parent: Option<ThreadGroupRef>,
    threads: Mutex<HashMap<i32, Weak<Thread>>>,
}

impl ThreadGroup {
    pub fn new(tgid: AbsTgid, parent: Option<ThreadGroupRef>) -> ThreadGroupRef {
        Arc::new(ThreadGroup {
            tgid,
            parent,
            threads: Mutex::new(HashMap::new()),
        })
    }

    pub fn tgid(&self) -> AbsTgid {
        self.tgid
    }

    pub fn parent(&self) -> Option<&ThreadGroupRef> {
        self.parent.as_ref()
    }

    pub fn register(&self, thread: &Arc<Thread>) {
        self.threads
            .lock()
            .insert(thread.tid().0, Arc::downgrade(thread));
    }

    pub fn unregister(&self, tid: AbsTid) {
        self.threads.lock().remove(&tid.0);
    }

    pub fn get(&self, tid: AbsTid) -> Option<Arc<Thread>> {
        self.threads.lock().get(&tid.0).and_then(Weak::upgrade)
    }

    /// The member whose tid equals the group's tgid.
    pub fn leader(&self) -> Option<Arc<Thread>> {
        self.get(AbsTid(self.tgid.0))
    }

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

    pub fn contains(&self, thread: &Arc<Thread>) -> bool {
        self.get(thread.tid())
            .is_some_and(|found| Arc::ptr_eq(&found, thread))
    }
}
