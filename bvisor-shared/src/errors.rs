//! Error types used across the bvisor supervisor.
//!
//! Every error a syscall handler can produce maps onto a single guest-visible
//! errno via [`BvisorError::errno`]. Internal errors have no guest mapping;
//! the supervisor loop treats them as fatal.

use thiserror::Error;

/// Result type for bvisor operations.
pub type BvisorResult<T> = Result<T, BvisorError>;

#[derive(Debug, Error)]
pub enum BvisorError {
    /// A virtual file descriptor is not present in the caller's table.
    #[error("unknown virtual file descriptor {0}")]
    BadFd(i32),

    /// The path router matched a blocked prefix.
    #[error("path blocked by sandbox policy: {0}")]
    PathBlocked(String),

    /// The syscall number is on the static deny table.
    #[error("syscall {0} denied by sandbox policy")]
    SyscallDenied(i64),

    /// The target thread exists but is not visible from the caller's
    /// PID namespace.
    #[error("thread {0} is not visible from the caller's namespace")]
    NotVisible(i32),

    /// The thread is not in the registry and kernel reconciliation did not
    /// surface it either.
    #[error("thread {0} is not registered")]
    ThreadNotRegistered(i32),

    /// Ancestry walked out of the sandbox (parent tid <= 1).
    #[error("thread {0} is outside the sandbox")]
    ThreadNotInSandbox(i32),

    /// A clone requested namespace kinds the supervisor does not model.
    #[error("unsupported clone flags {0:#x}")]
    UnsupportedCloneFlag(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A path does not resolve inside the overlay region it was routed to.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Write attempted on a copy-on-write file still in its readthrough phase.
    #[error("read-only file: {0}")]
    ReadOnly(String),

    /// Write attempted on a synthesised /proc file.
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// A cross-process memory transfer failed.
    #[error("guest memory fault at {addr:#x} ({len} bytes)")]
    MemoryFault { addr: u64, len: usize },

    /// Host kernel errno surfaced unchanged to the guest.
    #[error("host error: {0}")]
    Os(#[from] nix::errno::Errno),

    /// Supervisor-internal failure. Never surfaced to the guest; the
    /// notification loop terminates on it.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BvisorError {
    /// The guest-visible errno for this error.
    ///
    /// Returns a positive errno value; the notifier transport negates it
    /// when building the response record.
    pub fn errno(&self) -> i32 {
        match self {
            BvisorError::BadFd(_) => libc::EBADF,
            BvisorError::PathBlocked(_) => libc::EPERM,
            BvisorError::SyscallDenied(_) => libc::ENOSYS,
            BvisorError::NotVisible(_)
            | BvisorError::ThreadNotRegistered(_)
            | BvisorError::ThreadNotInSandbox(_) => libc::ESRCH,
            BvisorError::UnsupportedCloneFlag(_) => libc::EINVAL,
            BvisorError::InvalidArgument(_) => libc::EINVAL,
            BvisorError::InvalidPath(_) => libc::EINVAL,
            BvisorError::NotFound(_) => libc::ENOENT,
            BvisorError::ReadOnly(_) => libc::EROFS,
            BvisorError::NotPermitted(_) => libc::EPERM,
            BvisorError::MemoryFault { .. } => libc::EFAULT,
            BvisorError::Os(errno) => *errno as i32,
            BvisorError::Internal(_) => libc::EIO,
        }
    }

    /// Whether the supervisor loop must terminate instead of answering the
    /// guest.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BvisorError::Internal(_))
    }
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for BvisorError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => BvisorError::Os(nix::errno::Errno::from_raw(code)),
            None => BvisorError::Internal(format!("I/O error: {}", err)),
        }
    }
}

impl From<String> for BvisorError {
    fn from(err: String) -> Self {
        BvisorError::Internal(err)
    }
}

impl From<&str> for BvisorError {
    fn from(err: &str) -> Self {
        BvisorError::Internal(err.to_string())
    }
}
