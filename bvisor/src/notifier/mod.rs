//! seccomp user-notification transport.
//!
//! The guest's leader installs a filter returning SECCOMP_RET_USER_NOTIF and
//! hands the notifier fd to the supervisor (filter installation itself is the
//! bootstrap's job, not ours). This module owns the other side: receiving
//! notification records, and sending back either "continue" or an emulated
//! result. The record layouts are bit-exact against the kernel ABI.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::ids::AbsTid;
use bvisor_shared::errors::BvisorResult;

/// `struct seccomp_data` from the kernel ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompData {
    pub nr: i32,
    pub arch: u32,
    pub instruction_pointer: u64,
    pub args: [u64; 6],
}

/// `struct seccomp_notif` from the kernel ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompNotif {
    pub id: u64,
    pub pid: u32,
    pub flags: u32,
    pub data: SeccompData,
}

/// `struct seccomp_notif_resp` from the kernel ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompNotifResp {
    pub id: u64,
    pub val: i64,
    pub error: i32,
    pub flags: u32,
}

/// Tells the kernel to execute the syscall normally with its original
/// arguments.
pub const SECCOMP_USER_NOTIF_FLAG_CONTINUE: u32 = 1;

const SECCOMP_IOC_MAGIC: u8 = b'!';
nix::ioctl_readwrite!(seccomp_notif_recv, SECCOMP_IOC_MAGIC, 0, SeccompNotif);
nix::ioctl_readwrite!(seccomp_notif_send, SECCOMP_IOC_MAGIC, 1, SeccompNotifResp);

/// One intercepted syscall, parsed out of the wire record.
#[derive(Debug, Clone, Copy)]
pub struct Notif {
    /// Opaque echo token; the response must carry it back unchanged.
    pub id: u64,
    /// Absolute tid of the guest thread blocked in this syscall.
    pub tid: AbsTid,
    /// Syscall number.
    pub nr: i64,
    /// The six raw argument words.
    pub args: [u64; 6],
}

impl Notif {
    /// Argument word reinterpreted as the signed int the syscall declares.
    pub fn arg_i32(&self, index: usize) -> i32 {
        self.args[index] as i32
    }

    pub fn arg_i64(&self, index: usize) -> i64 {
        self.args[index] as i64
    }
}

/// The supervisor's verdict on one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Kernel executes the syscall unchanged.
    Continue,
    /// Kernel does not execute; the guest observes `val` or `-errno`.
    Return { val: i64, errno: i32 },
}

impl Response {
    /// Successful emulated result.
    pub fn ok(val: i64) -> Self {
        Response::Return { val, errno: 0 }
    }

    /// Failed emulated result. Takes a positive errno.
    pub fn err(errno: i32) -> Self {
        Response::Return { val: 0, errno }
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, Response::Continue)
    }
}

/// Receiver/sender bound to a single notifier fd.
#[derive(Debug)]
pub struct Notifier {
    fd: OwnedFd,
}

impl Notifier {
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self { fd }
    }

    pub fn as_raw_fd(&self) -> i32 {
        self.fd.as_raw_fd()
    }

    /// Block until the next notification arrives.
    ///
    /// Returns `None` once the guest is gone: the kernel signals hangup on
    /// the notifier fd when the last filter user exits. An `ENOENT` from the
    /// recv ioctl means the notifying thread died between trigger and recv;
    /// that notification is simply gone and we go back to waiting.
    pub fn recv(&self) -> BvisorResult<Option<Notif>> {
        loop {
            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }

            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if !revents.contains(PollFlags::POLLIN) {
                if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                    return Ok(None);
                }
                continue;
            }

            let mut raw = SeccompNotif::default();
            // SAFETY: fd is a live seccomp notifier fd and raw is a properly
            // sized, writable seccomp_notif record.
            match unsafe { seccomp_notif_recv(self.fd.as_raw_fd(), &mut raw) } {
                Ok(_) => {
                    return Ok(Some(Notif {
                        id: raw.id,
                        tid: AbsTid(raw.pid as i32),
                        nr: raw.data.nr as i64,
                        args: raw.data.args,
                    }));
                }
                Err(Errno::ENOENT) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Deliver the verdict for notification `id`.
    ///
    /// `ENOENT` means the guest thread exited while we were handling its
    /// syscall; there is nobody left to answer, so it is swallowed.
    pub fn send(&self, id: u64, response: Response) -> BvisorResult<()> {
        let mut raw = match response {
            Response::Continue => SeccompNotifResp {
                id,
                val: 0,
                error: 0,
                flags: SECCOMP_USER_NOTIF_FLAG_CONTINUE,
            },
            Response::Return { val, errno } => SeccompNotifResp {
                id,
                val,
                error: -errno,
                flags: 0,
            },
        };

        // SAFETY: fd is a live seccomp notifier fd and raw is a properly
        // sized seccomp_notif_resp record.
        match unsafe { seccomp_notif_send(self.fd.as_raw_fd(), &mut raw) } {
            Ok(_) => Ok(()),
            Err(Errno::ENOENT) => {
                tracing::warn!(id, "guest thread exited before response delivery");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
