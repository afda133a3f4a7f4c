//! Guest process-tree model.
//!
//! Provides the refcounted graph the supervisor keeps of the guest:
//! - `Thread` / `ThreadGroup` / `Namespace` - one node per kernel object
//! - `FsInfo` - cwd/root/umask, shared under `CLONE_FS`
//! - `Registry` - the AbsTid entry point, with lazy kernel reconciliation
//! - `PidInfo` - the kernel-facts seam (`ProcPidInfo` in production,
//!   `StaticPidInfo` in tests)

mod fs_info;
mod namespace;
mod pid_info;
mod registry;
mod thread;
mod thread_group;

pub use fs_info::{FsInfo, FsInfoRef};
pub use namespace::{Namespace, NamespaceRef};
pub use pid_info::{PidInfo, PidStatus, ProcPidInfo, StaticPidInfo};
pub use registry::Registry;
pub use thread::{Thread, ThreadRef};
pub use thread_group::{ThreadGroup, ThreadGroupRef};
