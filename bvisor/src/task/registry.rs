//! Thread registry: the flat AbsTid map every handler enters through.
//!
//! The registry is the only owner of strong `Thread` references. Guest
//! threads can appear without the supervisor mediating the clone (it only
//! sees the next syscall), so a miss triggers reconciliation against the
//! kernel's own records: parent tids and namespace chains are authoritative
//! there, and the model merely caches them.

use std::collections::HashMap;
use std::sync::Arc;

use nix::sched::CloneFlags;
use parking_lot::Mutex;

use crate::ids::{AbsTgid, AbsTid, NsTgid, NsTid};
use crate::vfs::FdTable;
use bvisor_shared::errors::{BvisorError, BvisorResult};

use super::fs_info::FsInfo;
use super::namespace::{Namespace, NamespaceRef};
use super::pid_info::PidInfo;
use super::thread::{Thread, ThreadRef};
use super::thread_group::ThreadGroup;

/// Namespace kinds the supervisor does not model.
const UNSUPPORTED: CloneFlags = CloneFlags::CLONE_NEWUSER
    .union(CloneFlags::CLONE_NEWNET)
    .union(CloneFlags::CLONE_NEWNS);

pub struct Registry {
    threads: Mutex<HashMap<i32, ThreadRef>>,
    pid_info: Box<dyn PidInfo>,
}

impl Registry {
    pub fn new(pid_info: Box<dyn PidInfo>) -> Self {
        Registry {
            threads: Mutex::new(HashMap::new()),
            pid_info,
        }
    }

    /// Register the sandbox's initial thread.
    ///
    /// Allocates a fresh namespace, thread group, fd table and fs info. The
    /// thread's view of itself starts one namespace level deep; outer host
    /// levels the sandbox does not model are ignored.
    pub fn register_root(&self, tid: AbsTid) -> BvisorResult<ThreadRef> {
        if let Some(existing) = self.lookup(tid) {
            return Ok(existing);
        }

        let status = self.pid_info.status(tid)?;
        let ns_tid = status
            .ns_tids
            .last()
            .copied()
            .unwrap_or(NsTid(tid.0));

        let namespace = Namespace::new_root();
        let group = ThreadGroup::new(AbsTgid(tid.0), None);
        let thread = Thread::new(
            tid,
            vec![ns_tid],
            group.clone(),
            namespace.clone(),
            FdTable::new(),
            FsInfo::new("/"),
            None,
        );

        group.register(&thread);
        namespace.register(ns_tid, &thread);
        self.threads.lock().insert(tid.0, thread.clone());

        tracing::info!(tid = %tid, ns_tid = %ns_tid, "registered sandbox root thread");
        Ok(thread)
    }

    /// Register a child created by `parent` with the given clone flags.
    ///
    /// The kernel's namespace chain for the child is fetched and must be at
    /// least as deep as the namespace the child lands in; registering with a
    /// shorter chain means the model and the kernel disagree, which is fatal.
    pub fn register_child(
        &self,
        parent: &ThreadRef,
        tid: AbsTid,
        flags: CloneFlags,
    ) -> BvisorResult<ThreadRef> {
        if flags.intersects(UNSUPPORTED) {
            return Err(BvisorError::UnsupportedCloneFlag(flags.bits() as u64));
        }
        // The kernel itself refuses this combination; keep the model aligned.
        if flags.contains(CloneFlags::CLONE_THREAD | CloneFlags::CLONE_NEWPID) {
            return Err(BvisorError::UnsupportedCloneFlag(flags.bits() as u64));
        }
        if let Some(existing) = self.lookup(tid) {
            return Ok(existing);
        }

        let namespace = if flags.contains(CloneFlags::CLONE_NEWPID) {
            Namespace::new_child(parent.namespace())
        } else {
            parent.namespace().clone()
        };

        let group = if flags.contains(CloneFlags::CLONE_THREAD) {
            parent.group().clone()
        } else {
            ThreadGroup::new(AbsTgid(tid.0), Some(parent.group().clone()))
        };

        let fd_table = if flags.contains(CloneFlags::CLONE_FILES) {
            parent.fd_table().clone()
        } else {
            parent.fd_table().clone_table()?
        };

        let fs = if flags.contains(CloneFlags::CLONE_FS) {
            parent.fs().clone()
        } else {
            parent.fs().clone_info()
        };

        let parent_thread = if flags.contains(CloneFlags::CLONE_PARENT) {
            parent.parent()
        } else {
            Some(parent.clone())
        };

        let ns_tids = self.child_chain(tid, &namespace)?;
        let thread = Thread::new(
            tid,
            ns_tids,
            group.clone(),
            namespace,
            fd_table,
            fs,
            parent_thread.as_ref(),
        );

        group.register(&thread);
        register_in_namespaces(&thread);
        self.threads.lock().insert(tid.0, thread.clone());

        tracing::debug!(
            tid = %tid,
            parent = %parent.tid(),
            flags = ?flags,
            ns_tid = %thread.ns_tid(),
            "registered child thread"
        );
        Ok(thread)
    }

    /// The child's per-level NsTids, validated against the namespace depth
    /// it is being registered into.
    fn child_chain(&self, tid: AbsTid, namespace: &NamespaceRef) -> BvisorResult<Vec<NsTid>> {
        let depth = namespace.depth();
        let chain = self.pid_info.status(tid)?.ns_tids;
        if chain.len() < depth {
            return Err(BvisorError::Internal(format!(
                "thread {} has a {}-level namespace chain, model expects {}",
                tid,
                chain.len(),
                depth
            )));
        }
        Ok(chain[chain.len() - depth..].to_vec())
    }

    fn lookup(&self, tid: AbsTid) -> Option<ThreadRef> {
        self.threads.lock().get(&tid.0).cloned()
    }

    pub fn contains(&self, tid: AbsTid) -> bool {
        self.threads.lock().contains_key(&tid.0)
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    /// The thread behind an absolute tid, reconciling with the kernel when
    /// the model has not seen it yet.
    pub fn get(&self, tid: AbsTid) -> BvisorResult<ThreadRef> {
        if let Some(thread) = self.lookup(tid) {
            return Ok(thread);
        }
        self.sync(tid)?;
        self.lookup(tid)
            .ok_or(BvisorError::ThreadNotRegistered(tid.0))
    }

    /// Resolve a namespaced TGID in the caller's namespace to its thread.
    ///
    /// The result must be a group leader: a TGID names a process, and only
    /// the leader carries `tid == tgid`.
    pub fn get_namespaced(&self, caller: &ThreadRef, target: NsTgid) -> BvisorResult<ThreadRef> {
        let find = || {
            caller
                .namespace()
                .lookup(NsTid(target.0))
                .filter(|t| t.is_group_leader())
        };

        if let Some(found) = find() {
            return Ok(found);
        }
        self.sync_all();
        find().ok_or(BvisorError::NotVisible(target.0))
    }

    /// Resolve a namespaced TID (any thread, leader or not) in the caller's
    /// namespace.
    pub fn get_namespaced_tid(&self, caller: &ThreadRef, target: NsTid) -> BvisorResult<ThreadRef> {
        if let Some(found) = caller.namespace().lookup(target) {
            return Ok(found);
        }
        self.sync_all();
        caller
            .namespace()
            .lookup(target)
            .ok_or(BvisorError::NotVisible(target.0))
    }

    /// Reconcile one unknown tid against the kernel.
    ///
    /// Walks ancestry until it reaches a registered thread, registering on
    /// the way back down with clone flags inferred from what the kernel
    /// reports. Idempotent: syncing a registered tid is a no-op.
    pub fn sync(&self, tid: AbsTid) -> BvisorResult<()> {
        if self.contains(tid) {
            return Ok(());
        }
        if tid.0 <= 1 {
            return Err(BvisorError::ThreadNotInSandbox(tid.0));
        }

        let status = self
            .pid_info
            .status(tid)
            .map_err(|_| BvisorError::ThreadNotRegistered(tid.0))?;

        if status.tgid.0 != tid.0 {
            // A sibling thread: make sure its group leader exists first,
            // then join the group. Threads share files and fs state with
            // their group in practice; /proc cannot reveal otherwise.
            let leader_tid = AbsTid(status.tgid.0);
            self.sync(leader_tid)?;
            let leader = self
                .lookup(leader_tid)
                .ok_or(BvisorError::ThreadNotRegistered(leader_tid.0))?;
            self.register_child(
                &leader,
                tid,
                CloneFlags::CLONE_THREAD | CloneFlags::CLONE_FILES | CloneFlags::CLONE_FS,
            )?;
            return Ok(());
        }

        // A new process: its parent must be inside the sandbox.
        let parent_tid = status.parent;
        if parent_tid.0 <= 1 {
            return Err(BvisorError::ThreadNotInSandbox(tid.0));
        }
        self.sync(parent_tid)?;
        let parent = self
            .lookup(parent_tid)
            .ok_or(BvisorError::ThreadNotRegistered(parent_tid.0))?;

        // A chain one longer than the parent's means the clone entered a
        // fresh pid namespace.
        let parent_status = self.pid_info.status(parent_tid)?;
        let mut flags = CloneFlags::empty();
        if status.ns_tids.len() == parent_status.ns_tids.len() + 1 {
            flags |= CloneFlags::CLONE_NEWPID;
        } else if status.ns_tids.len() != parent_status.ns_tids.len() {
            return Err(BvisorError::Internal(format!(
                "thread {} namespace chain ({} levels) diverges from parent {} ({} levels)",
                tid,
                status.ns_tids.len(),
                parent_tid,
                parent_status.ns_tids.len()
            )));
        }

        self.register_child(&parent, tid, flags)?;
        Ok(())
    }

    /// Reconcile every live kernel tid. Tids outside the sandbox are
    /// skipped.
    pub fn sync_all(&self) {
        let Ok(tids) = self.pid_info.live_tids() else {
            return;
        };
        for tid in tids {
            if let Err(err) = self.sync(tid) {
                tracing::trace!(tid = %tid, %err, "skipping tid during full sync");
            }
        }
    }

    /// Apply exit semantics for `thread`.
    ///
    /// A namespace root takes its whole namespace with it, descendant
    /// namespaces included (their threads are registered at the root's level
    /// too). Any other thread hands its children to the namespace root and
    /// leaves alone.
    pub fn handle_exit(&self, thread: &ThreadRef) {
        if thread.is_namespace_root() {
            let victims = thread.namespace().threads();
            tracing::info!(
                tid = %thread.tid(),
                count = victims.len(),
                "namespace root exited, collecting namespace"
            );
            for victim in victims {
                self.remove_thread(&victim);
            }
        } else {
            if let Some(root) = namespace_root(thread) {
                for child in self.children_of(thread) {
                    child.set_parent(Some(&root));
                }
            }
            self.remove_thread(thread);
        }
    }

    fn children_of(&self, thread: &ThreadRef) -> Vec<ThreadRef> {
        self.threads
            .lock()
            .values()
            .filter(|t| {
                t.parent()
                    .is_some_and(|p| Arc::ptr_eq(&p, thread))
            })
            .cloned()
            .collect()
    }

    fn remove_thread(&self, thread: &ThreadRef) {
        thread.group().unregister(thread.tid());
        unregister_from_namespaces(thread);
        self.threads.lock().remove(&thread.tid().0);
        tracing::debug!(tid = %thread.tid(), "deregistered thread");
    }
}

/// Insert a thread into its own namespace and every ancestor, keyed by the
/// per-level NsTid.
fn register_in_namespaces(thread: &ThreadRef) {
    let chain = thread.ns_tids();
    let mut level = Some(thread.namespace().clone());
    let mut index = chain.len();
    while let Some(ns) = level {
        index -= 1;
        ns.register(chain[index], thread);
        level = ns.parent().cloned();
    }
    debug_assert_eq!(index, 0);
}

fn unregister_from_namespaces(thread: &ThreadRef) {
    let chain = thread.ns_tids();
    let mut level = Some(thread.namespace().clone());
    let mut index = chain.len();
    while let Some(ns) = level {
        index -= 1;
        ns.unregister(chain[index]);
        level = ns.parent().cloned();
    }
}

/// The root thread of `thread`'s namespace: the member whose parent sits in
/// a different namespace (or who has none). That thread is the namespace's
/// init and inherits orphans.
fn namespace_root(thread: &ThreadRef) -> Option<ThreadRef> {
    thread
        .namespace()
        .threads()
        .into_iter()
        .find(|t| Arc::ptr_eq(t.namespace(), thread.namespace()) && t.is_namespace_root())
}
