//! Static syscall deny table.
//!
//! The router's path rules answer with EPERM; this table answers with
//! ENOSYS, so a guest can tell "you may not touch that path" apart from
//! "this kernel facility does not exist in the sandbox".
//!
//! Everything here either reconfigures the sandbox boundary itself (seccomp,
//! ptrace, namespaces, mounts), loads code into the kernel, or reaches
//! another process's memory. None of it has a legitimate in-sandbox use.

/// Syscall numbers refused with ENOSYS.
pub const DENIED_SYSCALLS: &[i64] = &[
    libc::SYS_ptrace,
    libc::SYS_mount,
    libc::SYS_umount2,
    libc::SYS_chroot,
    libc::SYS_pivot_root,
    libc::SYS_reboot,
    libc::SYS_setns,
    libc::SYS_unshare,
    libc::SYS_seccomp,
    libc::SYS_bpf,
    libc::SYS_process_vm_readv,
    libc::SYS_process_vm_writev,
    libc::SYS_kexec_load,
    libc::SYS_kexec_file_load,
    libc::SYS_init_module,
    libc::SYS_finit_module,
    libc::SYS_delete_module,
    libc::SYS_setrlimit,
    libc::SYS_prlimit64,
    libc::SYS_personality,
];

/// Check if a syscall number is on the deny table.
pub fn is_denied(nr: i64) -> bool {
    DENIED_SYSCALLS.contains(&nr)
}
