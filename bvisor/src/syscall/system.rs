//! System information handlers with virtualised fields.

use crate::mem;
use crate::notifier::{Notif, Response};
use crate::supervisor::Supervisor;
use crate::task::ThreadRef;
use bvisor_shared::errors::BvisorResult;

const RELEASE: &str = "6.1.0-bvisor";
const VERSION: &str = "#1 SMP PREEMPT_DYNAMIC";

/// Bytes the guest is told it has; the sandbox does not account memory, it
/// just reports a stable fiction.
const VIRTUAL_TOTAL_RAM: u64 = 1 << 30;

pub fn sys_uname(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    // SAFETY: utsname is plain data; zero is a valid baseline.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    fill_field(&mut uts.sysname, "Linux");
    fill_field(&mut uts.nodename, &sup.options().hostname);
    fill_field(&mut uts.release, RELEASE);
    fill_field(&mut uts.version, VERSION);
    fill_field(&mut uts.machine, std::env::consts::ARCH);
    fill_field(&mut uts.domainname, "(none)");

    mem::write_value(sup.memory(), caller.tid(), notif.args[0], &uts)?;
    Ok(Response::ok(0))
}

fn fill_field(field: &mut [libc::c_char; 65], value: &str) {
    for (slot, byte) in field.iter_mut().zip(value.bytes().take(64)) {
        *slot = byte as libc::c_char;
    }
}

pub fn sys_sysinfo(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    // SAFETY: sysinfo is plain data; zero is a valid baseline.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    info.uptime = sup.options().virtual_uptime_secs;
    info.totalram = VIRTUAL_TOTAL_RAM;
    info.freeram = VIRTUAL_TOTAL_RAM / 2;
    info.procs = sup.registry().len() as u16;
    info.mem_unit = 1;

    mem::write_value(sup.memory(), caller.tid(), notif.args[0], &info)?;
    Ok(Response::ok(0))
}
