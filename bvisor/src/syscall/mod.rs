//! Syscall dispatch.
//!
//! One handler per intercepted call number. Anything not on the deny table
//! and not recognised here continues into the kernel unchanged, which keeps
//! the sandbox safe-by-default for calls that need no emulation.

mod fs;
mod process;
mod system;

use crate::ids::Vfd;
use crate::notifier::{Notif, Response};
use crate::policy;
use crate::router::normalize;
use crate::supervisor::Supervisor;
use crate::task::ThreadRef;
use bvisor_shared::errors::{BvisorError, BvisorResult};

/// Upper bound on a single emulated transfer. Guests asking for more get a
/// short read/write, which POSIX permits.
pub(crate) const MAX_IO_CHUNK: usize = 1 << 20;

type Handler = fn(&Supervisor, &ThreadRef, &Notif) -> BvisorResult<Response>;

fn handler_for(nr: i64) -> Option<Handler> {
    Some(match nr {
        libc::SYS_openat => fs::sys_openat,
        libc::SYS_close => fs::sys_close,
        libc::SYS_read => fs::sys_read,
        libc::SYS_write => fs::sys_write,
        libc::SYS_readv => fs::sys_readv,
        libc::SYS_writev => fs::sys_writev,
        libc::SYS_pread64 => fs::sys_pread64,
        libc::SYS_pwrite64 => fs::sys_pwrite64,
        libc::SYS_lseek => fs::sys_lseek,
        libc::SYS_dup => fs::sys_dup,
        libc::SYS_dup3 => fs::sys_dup3,
        libc::SYS_fstat => fs::sys_fstat,
        libc::SYS_newfstatat => fs::sys_newfstatat,
        libc::SYS_faccessat => fs::sys_faccessat,
        libc::SYS_getcwd => fs::sys_getcwd,
        libc::SYS_chdir => fs::sys_chdir,
        libc::SYS_readlinkat => fs::sys_readlinkat,
        libc::SYS_pipe2 => fs::sys_pipe2,
        libc::SYS_getpid => process::sys_getpid,
        libc::SYS_getppid => process::sys_getppid,
        libc::SYS_gettid => process::sys_gettid,
        libc::SYS_kill => process::sys_kill,
        libc::SYS_tkill => process::sys_tkill,
        libc::SYS_exit => process::sys_exit,
        libc::SYS_exit_group => process::sys_exit,
        libc::SYS_uname => system::sys_uname,
        libc::SYS_sysinfo => system::sys_sysinfo,
        _ => return None,
    })
}

/// Adjudicate one notification.
///
/// Guest-visible errors become error responses via the shared errno mapping;
/// only internal errors propagate (and terminate the supervisor loop).
pub fn dispatch(sup: &Supervisor, notif: &Notif) -> BvisorResult<Response> {
    if policy::is_denied(notif.nr) {
        tracing::debug!(nr = notif.nr, tid = %notif.tid, "syscall on deny table");
        return Ok(Response::err(libc::ENOSYS));
    }

    let Some(handler) = handler_for(notif.nr) else {
        return Ok(Response::Continue);
    };

    let caller = match sup.registry().get(notif.tid) {
        Ok(caller) => caller,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            tracing::debug!(tid = %notif.tid, %err, "caller not resolvable");
            return Ok(Response::err(err.errno()));
        }
    };

    match handler(sup, &caller, notif) {
        Ok(response) => Ok(response),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::trace!(nr = notif.nr, tid = %notif.tid, %err, "handler error");
            Ok(Response::err(err.errno()))
        }
    }
}

/// Normalise a possibly-relative guest path against its dirfd anchor.
///
/// Relative paths join onto the dirfd's recorded open path, or onto the
/// caller's cwd for `AT_FDCWD`.
pub(crate) fn resolve_path(
    caller: &ThreadRef,
    dirfd: i32,
    raw: &str,
) -> BvisorResult<String> {
    if raw.starts_with('/') {
        return Ok(normalize("/", raw));
    }
    let base = if dirfd == libc::AT_FDCWD {
        caller.fs().cwd()
    } else {
        let file = caller
            .fd_table()
            .get(Vfd(dirfd))
            .ok_or(BvisorError::BadFd(dirfd))?;
        file.opened_path()
            .ok_or_else(|| {
                BvisorError::InvalidPath(format!("dirfd {} has no recorded path", dirfd))
            })?
            .to_string()
    };
    Ok(normalize(&base, raw))
}
