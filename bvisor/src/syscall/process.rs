//! Process and signal syscall handlers.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::ids::{NsTgid, NsTid};
use crate::notifier::{Notif, Response};
use crate::supervisor::Supervisor;
use crate::task::ThreadRef;
use bvisor_shared::errors::{BvisorError, BvisorResult};

pub fn sys_getpid(_sup: &Supervisor, caller: &ThreadRef, _notif: &Notif) -> BvisorResult<Response> {
    let leader = caller
        .group()
        .leader()
        .ok_or(BvisorError::ThreadNotRegistered(caller.tgid().0))?;
    Ok(Response::ok(leader.ns_tid().0 as i64))
}

pub fn sys_gettid(_sup: &Supervisor, caller: &ThreadRef, _notif: &Notif) -> BvisorResult<Response> {
    Ok(Response::ok(caller.ns_tid().0 as i64))
}

/// Parent pid as visible from the caller's namespace. A parent above the
/// caller's namespace has no name there, which Linux reports as 0.
pub fn sys_getppid(_sup: &Supervisor, caller: &ThreadRef, _notif: &Notif) -> BvisorResult<Response> {
    let depth = caller.namespace().depth();
    let ppid = caller
        .parent()
        .and_then(|parent| parent.group().leader())
        .and_then(|leader| leader.ns_tid_at_depth(depth))
        .map_or(0, |nstid| nstid.0);
    Ok(Response::ok(ppid as i64))
}

pub fn sys_kill(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let pid = notif.arg_i32(0);
    let signum = notif.arg_i32(1);

    // Process-group (pid <= 0) delivery is not modelled; reject instead of
    // guessing.
    if pid <= 0 {
        return Err(BvisorError::InvalidArgument(format!(
            "kill target {} must be positive",
            pid
        )));
    }

    let target = sup.registry().get_namespaced(caller, NsTgid(pid))?;
    deliver(target.tid().0, signum)?;
    tracing::debug!(
        caller = %caller.tid(),
        target = %target.tid(),
        signum,
        "delivered kill"
    );
    Ok(Response::ok(0))
}

pub fn sys_tkill(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let tid = notif.arg_i32(0);
    let signum = notif.arg_i32(1);

    if tid <= 0 {
        return Err(BvisorError::InvalidArgument(format!(
            "tkill target {} must be positive",
            tid
        )));
    }

    let target = sup.registry().get_namespaced_tid(caller, NsTid(tid))?;
    deliver(target.tid().0, signum)?;
    Ok(Response::ok(0))
}

fn deliver(abs_tid: i32, signum: i32) -> BvisorResult<()> {
    // Signal 0 is the existence probe.
    let signal = if signum == 0 {
        None
    } else {
        Some(Signal::try_from(signum).map_err(|_| BvisorError::Os(Errno::EINVAL))?)
    };
    kill(Pid::from_raw(abs_tid), signal)?;
    Ok(())
}

/// exit and exit_group.
///
/// The model is updated first, then the kernel is left to actually
/// terminate the thread. Registry state changes only here, never on signal
/// delivery.
pub fn sys_exit(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    tracing::debug!(tid = %caller.tid(), code = notif.arg_i32(0), "guest thread exiting");
    sup.registry().handle_exit(caller);
    Ok(Response::Continue)
}
