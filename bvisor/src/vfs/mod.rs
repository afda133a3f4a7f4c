//! Virtual file layer.
//!
//! Provides the pieces a handler needs to serve file syscalls:
//! - `File` / `Backend` - one handle type over four storage strategies
//! - `FdTable` - refcounted vfd map with POSIX dup and clone semantics
//! - `statx_to_stat` - backend attributes in the guest's stat ABI

mod fd_table;
mod file;
mod stat;

pub use fd_table::{FdEntry, FdTable, FdTableRef};
pub use file::{Backend, CowState, File, FileRef};
pub use stat::{makedev, statx_to_stat};
