//! File and path syscall handlers.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::Whence;

use crate::ids::{NsTid, Vfd};
use crate::mem;
use crate::notifier::{Notif, Response};
use crate::router::{self, ProcKind, Verdict};
use crate::supervisor::Supervisor;
use crate::task::ThreadRef;
use crate::vfs::{File, FileRef, statx_to_stat};
use bvisor_shared::errors::{BvisorError, BvisorResult};

use super::{MAX_IO_CHUNK, resolve_path};

/// iovec as laid out in guest memory on 64-bit targets.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct GuestIovec {
    base: u64,
    len: u64,
}

fn lookup(caller: &ThreadRef, vfd: i32) -> BvisorResult<FileRef> {
    caller
        .fd_table()
        .get(Vfd(vfd))
        .ok_or(BvisorError::BadFd(vfd))
}

/// The guest's fds 0..=2 are its real stdio, not table entries; I/O on them
/// belongs to the kernel.
macro_rules! continue_for_stdio {
    ($notif:expr) => {
        if Vfd($notif.arg_i32(0)).is_stdio() {
            return Ok(Response::Continue);
        }
    };
}

pub fn sys_openat(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let dirfd = notif.arg_i32(0);
    let raw = mem::read_cstring(sup.memory(), caller.tid(), notif.args[1])?;
    let flags = notif.arg_i32(2);
    let mode = notif.args[3] as u32;

    let path = resolve_path(caller, dirfd, &raw)?;
    let verdict = router::route(&path);
    tracing::trace!(path = %path, verdict = verdict.as_str(), "openat");

    let file = match verdict {
        Verdict::Block => return Err(BvisorError::PathBlocked(path)),
        Verdict::Passthrough => File::open_passthrough(&path, flags, mode)?,
        Verdict::Tmp => {
            let resolved = sup.overlay().resolve_tmp(&path)?;
            File::open_tmp(&resolved, &path, flags, mode)?
        }
        Verdict::Cow => File::open_cow(sup.overlay(), &path, flags, mode)?,
        Verdict::Proc(kind) => open_proc(sup, caller, kind, &path)?,
    };

    let cloexec = flags & libc::O_CLOEXEC != 0;
    let vfd = caller.fd_table().insert(file, cloexec);
    Ok(Response::ok(vfd.0 as i64))
}

/// Render a synthetic /proc file for the caller's view of the target.
fn open_proc(
    sup: &Supervisor,
    caller: &ThreadRef,
    kind: ProcKind,
    path: &str,
) -> BvisorResult<File> {
    let nstid = match kind {
        ProcKind::SelfPid => caller.ns_tid(),
        ProcKind::Pid(ns_tgid) => {
            // Resolves only if the target is visible from the caller's
            // namespace; the pid is by definition its NsTid there.
            sup.registry().get_namespaced(caller, ns_tgid)?;
            NsTid(ns_tgid.0)
        }
    };
    Ok(File::from_proc(format!("{}\n", nstid).into_bytes(), path))
}

pub fn sys_close(_sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let vfd = notif.arg_i32(0);
    if caller.fd_table().remove(Vfd(vfd)) {
        Ok(Response::ok(0))
    } else {
        Err(BvisorError::BadFd(vfd))
    }
}

pub fn sys_read(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let file = lookup(caller, notif.arg_i32(0))?;
    let count = (notif.args[2] as usize).min(MAX_IO_CHUNK);
    let mut buf = vec![0u8; count];
    let n = file.read(&mut buf)?;
    sup.memory().write_bytes(caller.tid(), notif.args[1], &buf[..n])?;
    Ok(Response::ok(n as i64))
}

pub fn sys_write(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let file = lookup(caller, notif.arg_i32(0))?;
    let count = (notif.args[2] as usize).min(MAX_IO_CHUNK);
    let mut buf = vec![0u8; count];
    sup.memory().read_bytes(caller.tid(), notif.args[1], &mut buf)?;
    let n = file.write(&buf)?;
    Ok(Response::ok(n as i64))
}

pub fn sys_pread64(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let file = lookup(caller, notif.arg_i32(0))?;
    let count = (notif.args[2] as usize).min(MAX_IO_CHUNK);
    let offset = notif.arg_i64(3);
    let mut buf = vec![0u8; count];
    let n = file.pread(&mut buf, offset)?;
    sup.memory().write_bytes(caller.tid(), notif.args[1], &buf[..n])?;
    Ok(Response::ok(n as i64))
}

pub fn sys_pwrite64(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let file = lookup(caller, notif.arg_i32(0))?;
    let count = (notif.args[2] as usize).min(MAX_IO_CHUNK);
    let offset = notif.arg_i64(3);
    let mut buf = vec![0u8; count];
    sup.memory().read_bytes(caller.tid(), notif.args[1], &mut buf)?;
    let n = file.pwrite(&buf, offset)?;
    Ok(Response::ok(n as i64))
}

/// Gather/scatter loops transfer one iovec at a time, in array order, and
/// stop early on a short transfer, matching readv/writev semantics.
pub fn sys_readv(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let file = lookup(caller, notif.arg_i32(0))?;
    let iovs = read_iovec_array(sup, caller, notif.args[1], notif.arg_i32(2))?;

    let mut total = 0usize;
    for iov in iovs {
        let want = (iov.len as usize).min(MAX_IO_CHUNK);
        if want == 0 {
            continue;
        }
        let mut buf = vec![0u8; want];
        let n = file.read(&mut buf)?;
        sup.memory().write_bytes(caller.tid(), iov.base, &buf[..n])?;
        total += n;
        if n < want {
            break;
        }
    }
    Ok(Response::ok(total as i64))
}

pub fn sys_writev(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let file = lookup(caller, notif.arg_i32(0))?;
    let iovs = read_iovec_array(sup, caller, notif.args[1], notif.arg_i32(2))?;

    let mut total = 0usize;
    for iov in iovs {
        let len = (iov.len as usize).min(MAX_IO_CHUNK);
        if len == 0 {
            continue;
        }
        let mut buf = vec![0u8; len];
        sup.memory().read_bytes(caller.tid(), iov.base, &mut buf)?;
        let n = file.write(&buf)?;
        total += n;
        if n < len {
            break;
        }
    }
    Ok(Response::ok(total as i64))
}

fn read_iovec_array(
    sup: &Supervisor,
    caller: &ThreadRef,
    addr: u64,
    iovcnt: i32,
) -> BvisorResult<Vec<GuestIovec>> {
    if iovcnt < 0 || iovcnt as usize > libc::UIO_MAXIOV as usize {
        return Err(BvisorError::InvalidArgument(format!(
            "iovcnt {} out of range",
            iovcnt
        )));
    }
    let mut iovs = Vec::with_capacity(iovcnt as usize);
    for index in 0..iovcnt as u64 {
        let iov: GuestIovec = mem::read_value(
            sup.memory(),
            caller.tid(),
            addr + index * std::mem::size_of::<GuestIovec>() as u64,
        )?;
        iovs.push(iov);
    }
    Ok(iovs)
}

pub fn sys_lseek(_sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    continue_for_stdio!(notif);
    let file = lookup(caller, notif.arg_i32(0))?;
    let offset = notif.arg_i64(1);
    let whence = match notif.arg_i32(2) {
        libc::SEEK_SET => Whence::SeekSet,
        libc::SEEK_CUR => Whence::SeekCur,
        libc::SEEK_END => Whence::SeekEnd,
        other => {
            return Err(BvisorError::InvalidArgument(format!(
                "unsupported lseek whence {}",
                other
            )));
        }
    };
    let pos = file.lseek(offset, whence)?;
    Ok(Response::ok(pos))
}

pub fn sys_dup(_sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let file = lookup(caller, notif.arg_i32(0))?;
    let vfd = caller.fd_table().dup(file);
    Ok(Response::ok(vfd.0 as i64))
}

pub fn sys_dup3(_sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let oldfd = notif.arg_i32(0);
    let newfd = notif.arg_i32(1);
    let flags = notif.arg_i32(2);

    if oldfd == newfd {
        return Err(BvisorError::InvalidArgument(
            "dup3 with oldfd == newfd".to_string(),
        ));
    }
    if flags & !libc::O_CLOEXEC != 0 {
        return Err(BvisorError::InvalidArgument(format!(
            "unsupported dup3 flags {:#x}",
            flags
        )));
    }

    let file = lookup(caller, oldfd)?;
    let table = caller.fd_table();
    // dup2/dup3 silently replace an existing target.
    table.remove(Vfd(newfd));
    table.dup_at(file, Vfd(newfd), flags & libc::O_CLOEXEC != 0);
    Ok(Response::ok(newfd as i64))
}

pub fn sys_fstat(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let vfd = Vfd(notif.arg_i32(0));
    // Stdio stays with the kernel: those fds are real in the guest.
    if vfd.is_stdio() {
        return Ok(Response::Continue);
    }
    let file = lookup(caller, vfd.0)?;
    let stx = file.statx()?;
    let st = statx_to_stat(&stx);
    mem::write_value(sup.memory(), caller.tid(), notif.args[1], &st)?;
    Ok(Response::ok(0))
}

pub fn sys_newfstatat(
    sup: &Supervisor,
    caller: &ThreadRef,
    notif: &Notif,
) -> BvisorResult<Response> {
    let dirfd = notif.arg_i32(0);
    let raw = mem::read_cstring(sup.memory(), caller.tid(), notif.args[1])?;
    let statbuf = notif.args[2];
    let flags = notif.arg_i32(3);

    let stx = if raw.is_empty() && flags & libc::AT_EMPTY_PATH != 0 {
        let vfd = Vfd(dirfd);
        if vfd.is_stdio() {
            return Ok(Response::Continue);
        }
        lookup(caller, dirfd)?.statx()?
    } else {
        let path = resolve_path(caller, dirfd, &raw)?;
        match router::route(&path) {
            Verdict::Block => return Err(BvisorError::PathBlocked(path)),
            Verdict::Proc(kind) => open_proc(sup, caller, kind, &path)?.statx()?,
            Verdict::Tmp => path_statx(&sup.overlay().resolve_tmp(&path)?, flags)?,
            Verdict::Cow => path_statx(&cow_backing_path(sup, &path), flags)?,
            Verdict::Passthrough => path_statx(Path::new(&path), flags)?,
        }
    };

    let st = statx_to_stat(&stx);
    mem::write_value(sup.memory(), caller.tid(), statbuf, &st)?;
    Ok(Response::ok(0))
}

/// Host location currently backing a COW-routed guest path: the overlay copy
/// once materialised, the host original before that.
fn cow_backing_path(sup: &Supervisor, path: &str) -> PathBuf {
    if sup.overlay().cow_exists(path) {
        sup.overlay().resolve_cow(path)
    } else {
        PathBuf::from(path)
    }
}

fn path_statx(path: &Path, at_flags: i32) -> BvisorResult<libc::statx> {
    let cpath = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| BvisorError::InvalidPath(path.display().to_string()))?;
    let flags = at_flags & libc::AT_SYMLINK_NOFOLLOW;
    // SAFETY: valid NUL-terminated path and a properly sized statx output
    // record.
    let mut stx = unsafe { std::mem::zeroed::<libc::statx>() };
    let rc = unsafe {
        libc::statx(
            libc::AT_FDCWD,
            cpath.as_ptr(),
            flags,
            libc::STATX_BASIC_STATS,
            &mut stx,
        )
    };
    if rc < 0 {
        return Err(BvisorError::Os(Errno::last()));
    }
    Ok(stx)
}

pub fn sys_faccessat(
    sup: &Supervisor,
    caller: &ThreadRef,
    notif: &Notif,
) -> BvisorResult<Response> {
    let dirfd = notif.arg_i32(0);
    let raw = mem::read_cstring(sup.memory(), caller.tid(), notif.args[1])?;
    let amode = notif.arg_i32(2);

    let path = resolve_path(caller, dirfd, &raw)?;
    match router::route(&path) {
        Verdict::Block => Err(BvisorError::PathBlocked(path)),
        Verdict::Proc(kind) => {
            // Existence and readability only; synthetic files are 0444.
            open_proc(sup, caller, kind, &path)?;
            if amode & (libc::W_OK | libc::X_OK) != 0 {
                Err(BvisorError::Os(Errno::EACCES))
            } else {
                Ok(Response::ok(0))
            }
        }
        Verdict::Tmp => host_access(&sup.overlay().resolve_tmp(&path)?, amode),
        Verdict::Cow => host_access(&cow_backing_path(sup, &path), amode),
        Verdict::Passthrough => host_access(Path::new(&path), amode),
    }
}

fn host_access(path: &Path, amode: i32) -> BvisorResult<Response> {
    let flags = nix::unistd::AccessFlags::from_bits_truncate(amode);
    nix::unistd::access(path, flags)?;
    Ok(Response::ok(0))
}

pub fn sys_getcwd(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let size = notif.args[1] as usize;
    let mut bytes = caller.fs().cwd().into_bytes();
    bytes.push(0);
    if size < bytes.len() {
        return Err(BvisorError::Os(Errno::ERANGE));
    }
    sup.memory().write_bytes(caller.tid(), notif.args[0], &bytes)?;
    Ok(Response::ok(bytes.len() as i64))
}

pub fn sys_chdir(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let raw = mem::read_cstring(sup.memory(), caller.tid(), notif.args[0])?;
    let path = resolve_path(caller, libc::AT_FDCWD, &raw)?;

    let backing = match router::route(&path) {
        Verdict::Block => return Err(BvisorError::PathBlocked(path)),
        Verdict::Proc(_) => return Err(BvisorError::Os(Errno::ENOTDIR)),
        Verdict::Tmp => sup.overlay().resolve_tmp(&path)?,
        Verdict::Cow => cow_backing_path(sup, &path),
        Verdict::Passthrough => PathBuf::from(&path),
    };
    if !backing.exists() {
        return Err(BvisorError::NotFound(path));
    }
    if !backing.is_dir() {
        return Err(BvisorError::Os(Errno::ENOTDIR));
    }

    caller.fs().set_cwd(&path);
    Ok(Response::ok(0))
}

pub fn sys_readlinkat(
    sup: &Supervisor,
    caller: &ThreadRef,
    notif: &Notif,
) -> BvisorResult<Response> {
    let dirfd = notif.arg_i32(0);
    let raw = mem::read_cstring(sup.memory(), caller.tid(), notif.args[1])?;
    let bufaddr = notif.args[2];
    let bufsiz = notif.args[3] as usize;
    if bufsiz == 0 {
        return Err(BvisorError::InvalidArgument("readlinkat with zero-size buffer".into()));
    }

    let path = resolve_path(caller, dirfd, &raw)?;
    let target: Vec<u8> = match router::route(&path) {
        Verdict::Block => return Err(BvisorError::PathBlocked(path)),
        // /proc/self is a symlink to the caller's own pid.
        Verdict::Proc(ProcKind::SelfPid) => caller.ns_tid().to_string().into_bytes(),
        Verdict::Proc(ProcKind::Pid(_)) => return Err(BvisorError::Os(Errno::EINVAL)),
        Verdict::Tmp => {
            host_readlink(&sup.overlay().resolve_tmp(&path)?)?
        }
        Verdict::Cow => host_readlink(&cow_backing_path(sup, &path))?,
        Verdict::Passthrough => host_readlink(Path::new(&path))?,
    };

    // readlink truncates silently and returns the byte count, no NUL.
    let n = target.len().min(bufsiz);
    sup.memory().write_bytes(caller.tid(), bufaddr, &target[..n])?;
    Ok(Response::ok(n as i64))
}

fn host_readlink(path: &Path) -> BvisorResult<Vec<u8>> {
    let target = nix::fcntl::readlink(path)?;
    Ok(target.as_encoded_bytes().to_vec())
}

pub fn sys_pipe2(sup: &Supervisor, caller: &ThreadRef, notif: &Notif) -> BvisorResult<Response> {
    let flags = notif.arg_i32(1);
    let oflag = nix::fcntl::OFlag::from_bits_truncate(flags);
    let (read_end, write_end) = nix::unistd::pipe2(oflag)?;

    let cloexec = flags & libc::O_CLOEXEC != 0;
    let table = caller.fd_table();
    let read_vfd = table.insert(File::from_owned_fd(read_end, None), cloexec);
    let write_vfd = table.insert(File::from_owned_fd(write_end, None), cloexec);

    let pair: [i32; 2] = [read_vfd.0, write_vfd.0];
    mem::write_value(sup.memory(), caller.tid(), notif.args[0], &pair)?;
    Ok(Response::ok(0))
}
