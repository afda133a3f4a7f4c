//! The File handle and its four storage backends.
//!
//! Every virtual file descriptor resolves to a [`File`]. The backend decides
//! where bytes actually live: a host fd the supervisor passes operations
//! through to, a copy-on-write view of the host filesystem, the sandbox's
//! private tmp tree, or an in-memory buffer synthesised for /proc.

use std::fs;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::Path;
use std::sync::Arc;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::Whence;
use parking_lot::Mutex;

use crate::overlay::OverlayRoot;
use bvisor_shared::errors::{BvisorError, BvisorResult};

/// Phase of a copy-on-write file.
#[derive(Debug)]
pub enum CowState {
    /// No write has happened on this path yet; reads go to the host file.
    Readthrough(OwnedFd),
    /// A private overlay copy exists; all operations target it.
    Writecopy(OwnedFd),
}

#[derive(Debug)]
pub enum Backend {
    /// All operations delegate to a supervisor-owned kernel fd.
    Passthrough(OwnedFd),
    Cow(CowState),
    /// A file in the per-sandbox overlay tmp tree.
    Tmp(OwnedFd),
    /// Content rendered at open time; reads slice the buffer.
    Proc { buf: Vec<u8>, offset: u64 },
}

/// Shared, refcounted file handle.
///
/// Dropping the last reference releases the backing resource (the `OwnedFd`
/// closes on drop), so close-on-last-unref holds by construction.
pub type FileRef = Arc<File>;

#[derive(Debug)]
pub struct File {
    backend: Mutex<Backend>,
    opened_path: Option<String>,
}

/// Open flags that force COW materialisation.
const WRITE_INTENT: OFlag = OFlag::O_WRONLY
    .union(OFlag::O_RDWR)
    .union(OFlag::O_CREAT)
    .union(OFlag::O_TRUNC);

impl File {
    fn new(backend: Backend, opened_path: Option<String>) -> File {
        File {
            backend: Mutex::new(backend),
            opened_path,
        }
    }

    /// Open a host path directly and wrap the fd.
    pub fn open_passthrough(path: &str, flags: i32, mode: u32) -> BvisorResult<File> {
        let fd = nix::fcntl::open(
            path,
            OFlag::from_bits_truncate(flags),
            Mode::from_bits_truncate(mode),
        )?;
        Ok(File::new(Backend::Passthrough(fd), Some(path.to_string())))
    }

    /// Open a resolved path inside the overlay tmp tree.
    pub fn open_tmp(resolved: &Path, guest_path: &str, flags: i32, mode: u32) -> BvisorResult<File> {
        let fd = nix::fcntl::open(
            resolved,
            OFlag::from_bits_truncate(flags),
            Mode::from_bits_truncate(mode),
        )?;
        Ok(File::new(Backend::Tmp(fd), Some(guest_path.to_string())))
    }

    /// Open a guest path through the copy-on-write overlay.
    ///
    /// - An already-materialised path opens its overlay copy (writecopy).
    /// - Write intent materialises first: overlay parents are created and the
    ///   host bytes are copied up, then the copy is opened (writecopy).
    /// - Otherwise the host original is opened read-through.
    ///
    /// Once a path is materialised it stays writecopy for every later open in
    /// this sandbox, read-only opens included.
    pub fn open_cow(
        overlay: &OverlayRoot,
        guest_path: &str,
        flags: i32,
        mode: u32,
    ) -> BvisorResult<File> {
        let oflag = OFlag::from_bits_truncate(flags);
        let mode = Mode::from_bits_truncate(mode);

        if overlay.cow_exists(guest_path) {
            let fd = nix::fcntl::open(&overlay.resolve_cow(guest_path), oflag, mode)?;
            return Ok(File::new(
                Backend::Cow(CowState::Writecopy(fd)),
                Some(guest_path.to_string()),
            ));
        }

        if oflag.intersects(WRITE_INTENT) {
            overlay.create_cow_parent_dirs(guest_path)?;
            let copy = overlay.resolve_cow(guest_path);
            let host = Path::new(guest_path);
            if host.exists() {
                fs::copy(host, &copy).map_err(BvisorError::from)?;
                tracing::debug!(path = guest_path, "materialised cow copy");
            }
            let fd = nix::fcntl::open(&copy, oflag, mode)?;
            return Ok(File::new(
                Backend::Cow(CowState::Writecopy(fd)),
                Some(guest_path.to_string()),
            ));
        }

        let fd = nix::fcntl::open(guest_path, oflag, mode)?;
        Ok(File::new(
            Backend::Cow(CowState::Readthrough(fd)),
            Some(guest_path.to_string()),
        ))
    }

    /// Wrap content rendered from supervisor state as a synthetic file.
    pub fn from_proc(content: Vec<u8>, guest_path: &str) -> File {
        File::new(
            Backend::Proc { buf: content, offset: 0 },
            Some(guest_path.to_string()),
        )
    }

    /// Wrap an already-open supervisor fd (pipes, sockets).
    pub fn from_owned_fd(fd: OwnedFd, guest_path: Option<String>) -> File {
        File::new(Backend::Passthrough(fd), guest_path)
    }

    /// The normalised guest path this file was opened under, when recorded.
    pub fn opened_path(&self) -> Option<&str> {
        self.opened_path.as_deref()
    }

    /// Backend discriminator, for logging and tests.
    pub fn kind(&self) -> &'static str {
        match &*self.backend.lock() {
            Backend::Passthrough(_) => "passthrough",
            Backend::Cow(CowState::Readthrough(_)) => "cow-readthrough",
            Backend::Cow(CowState::Writecopy(_)) => "cow-writecopy",
            Backend::Tmp(_) => "tmp",
            Backend::Proc { .. } => "proc",
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> BvisorResult<usize> {
        let mut backend = self.backend.lock();
        match &mut *backend {
            Backend::Passthrough(fd) | Backend::Tmp(fd) => fd_read(fd, buf),
            Backend::Cow(CowState::Readthrough(fd) | CowState::Writecopy(fd)) => fd_read(fd, buf),
            Backend::Proc { buf: content, offset } => {
                let n = slice_at(content, *offset, buf);
                *offset += n as u64;
                Ok(n)
            }
        }
    }

    pub fn write(&self, data: &[u8]) -> BvisorResult<usize> {
        let mut backend = self.backend.lock();
        match &mut *backend {
            Backend::Passthrough(fd) | Backend::Tmp(fd) => fd_write(fd, data),
            Backend::Cow(CowState::Writecopy(fd)) => fd_write(fd, data),
            Backend::Cow(CowState::Readthrough(_)) => Err(BvisorError::ReadOnly(
                self.opened_path.clone().unwrap_or_default(),
            )),
            Backend::Proc { .. } => Err(BvisorError::NotPermitted(
                self.opened_path.clone().unwrap_or_default(),
            )),
        }
    }

    pub fn pread(&self, buf: &mut [u8], offset: i64) -> BvisorResult<usize> {
        let mut backend = self.backend.lock();
        match &mut *backend {
            Backend::Passthrough(fd) | Backend::Tmp(fd) => fd_pread(fd, buf, offset),
            Backend::Cow(CowState::Readthrough(fd) | CowState::Writecopy(fd)) => {
                fd_pread(fd, buf, offset)
            }
            Backend::Proc { buf: content, .. } => {
                if offset < 0 {
                    return Err(BvisorError::Os(Errno::EINVAL));
                }
                Ok(slice_at(content, offset as u64, buf))
            }
        }
    }

    pub fn pwrite(&self, data: &[u8], offset: i64) -> BvisorResult<usize> {
        let mut backend = self.backend.lock();
        match &mut *backend {
            Backend::Passthrough(fd) | Backend::Tmp(fd) => fd_pwrite(fd, data, offset),
            Backend::Cow(CowState::Writecopy(fd)) => fd_pwrite(fd, data, offset),
            Backend::Cow(CowState::Readthrough(_)) => Err(BvisorError::ReadOnly(
                self.opened_path.clone().unwrap_or_default(),
            )),
            Backend::Proc { .. } => Err(BvisorError::NotPermitted(
                self.opened_path.clone().unwrap_or_default(),
            )),
        }
    }

    pub fn lseek(&self, offset: i64, whence: Whence) -> BvisorResult<i64> {
        let mut backend = self.backend.lock();
        match &mut *backend {
            Backend::Passthrough(fd) | Backend::Tmp(fd) => fd_lseek(fd, offset, whence),
            Backend::Cow(CowState::Readthrough(fd) | CowState::Writecopy(fd)) => {
                fd_lseek(fd, offset, whence)
            }
            Backend::Proc { buf: content, offset: pos } => {
                let base = match whence {
                    Whence::SeekSet => 0,
                    Whence::SeekCur => *pos as i64,
                    Whence::SeekEnd => content.len() as i64,
                    _ => return Err(BvisorError::Os(Errno::EINVAL)),
                };
                let target = base + offset;
                if target < 0 {
                    return Err(BvisorError::Os(Errno::EINVAL));
                }
                *pos = target as u64;
                Ok(target)
            }
        }
    }

    pub fn statx(&self) -> BvisorResult<libc::statx> {
        let backend = self.backend.lock();
        match &*backend {
            Backend::Passthrough(fd) | Backend::Tmp(fd) => fd_statx(fd.as_fd()),
            Backend::Cow(CowState::Readthrough(fd) | CowState::Writecopy(fd)) => {
                fd_statx(fd.as_fd())
            }
            Backend::Proc { buf: content, .. } => Ok(proc_statx(content.len() as u64)),
        }
    }

    /// Deep copy, as required when an fd table is cloned without
    /// `CLONE_FILES`.
    ///
    /// Kernel-backed fds are duplicated, which preserves fork semantics for
    /// the file offset (both copies share the open file description). Proc
    /// buffers are cloned outright.
    pub fn duplicate(&self) -> BvisorResult<File> {
        let backend = self.backend.lock();
        let copy = match &*backend {
            Backend::Passthrough(fd) => Backend::Passthrough(nix::unistd::dup(fd)?),
            Backend::Tmp(fd) => Backend::Tmp(nix::unistd::dup(fd)?),
            Backend::Cow(CowState::Readthrough(fd)) => {
                Backend::Cow(CowState::Readthrough(nix::unistd::dup(fd)?))
            }
            Backend::Cow(CowState::Writecopy(fd)) => {
                Backend::Cow(CowState::Writecopy(nix::unistd::dup(fd)?))
            }
            Backend::Proc { buf, offset } => Backend::Proc {
                buf: buf.clone(),
                offset: *offset,
            },
        };
        Ok(File::new(copy, self.opened_path.clone()))
    }
}

fn fd_read(fd: &OwnedFd, buf: &mut [u8]) -> BvisorResult<usize> {
    // SAFETY: valid fd and a writable buffer of buf.len() bytes.
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if n < 0 {
        return Err(BvisorError::Os(Errno::last()));
    }
    Ok(n as usize)
}

fn fd_write(fd: &OwnedFd, data: &[u8]) -> BvisorResult<usize> {
    // SAFETY: valid fd and a readable buffer of data.len() bytes.
    let n = unsafe {
        libc::write(
            fd.as_raw_fd(),
            data.as_ptr() as *const libc::c_void,
            data.len(),
        )
    };
    if n < 0 {
        return Err(BvisorError::Os(Errno::last()));
    }
    Ok(n as usize)
}

fn fd_pread(fd: &OwnedFd, buf: &mut [u8], offset: i64) -> BvisorResult<usize> {
    // SAFETY: valid fd and a writable buffer of buf.len() bytes.
    let n = unsafe {
        libc::pread(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            offset,
        )
    };
    if n < 0 {
        return Err(BvisorError::Os(Errno::last()));
    }
    Ok(n as usize)
}

fn fd_pwrite(fd: &OwnedFd, data: &[u8], offset: i64) -> BvisorResult<usize> {
    // SAFETY: valid fd and a readable buffer of data.len() bytes.
    let n = unsafe {
        libc::pwrite(
            fd.as_raw_fd(),
            data.as_ptr() as *const libc::c_void,
            data.len(),
            offset,
        )
    };
    if n < 0 {
        return Err(BvisorError::Os(Errno::last()));
    }
    Ok(n as usize)
}

fn fd_lseek(fd: &OwnedFd, offset: i64, whence: Whence) -> BvisorResult<i64> {
    // SAFETY: valid fd; whence is one of the SEEK_* values by construction.
    let pos = unsafe { libc::lseek(fd.as_raw_fd(), offset, whence as i32) };
    if pos < 0 {
        return Err(BvisorError::Os(Errno::last()));
    }
    Ok(pos)
}

fn slice_at(content: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let start = (offset as usize).min(content.len());
    let n = (content.len() - start).min(buf.len());
    buf[..n].copy_from_slice(&content[start..start + n]);
    n
}

fn fd_statx(fd: BorrowedFd<'_>) -> BvisorResult<libc::statx> {
    // SAFETY: valid fd, empty C-string path, and a properly sized statx
    // output record.
    let mut stx = unsafe { std::mem::zeroed::<libc::statx>() };
    let rc = unsafe {
        libc::statx(
            fd.as_raw_fd(),
            c"".as_ptr(),
            libc::AT_EMPTY_PATH,
            libc::STATX_BASIC_STATS,
            &mut stx,
        )
    };
    if rc < 0 {
        return Err(BvisorError::Os(Errno::last()));
    }
    Ok(stx)
}

/// Attributes reported for synthetic /proc files.
fn proc_statx(size: u64) -> libc::statx {
    // SAFETY: statx is plain data; zero is a valid baseline.
    let mut stx = unsafe { std::mem::zeroed::<libc::statx>() };
    stx.stx_mask = libc::STATX_BASIC_STATS;
    stx.stx_mode = (libc::S_IFREG | 0o444) as u16;
    stx.stx_nlink = 1;
    stx.stx_blksize = 4096;
    stx.stx_size = size;
    stx
}
