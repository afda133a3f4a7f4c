//! End-to-end scenarios: synthetic notifications driven through the full
//! handler pipeline (router, overlay, fd tables, thread graph), with guest
//! memory served from local buffers and kernel pid facts from a static
//! table.

use std::ffi::CString;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nix::sched::CloneFlags;
use tempfile::TempDir;

use bvisor::mem::LocalMemory;
use bvisor::task::{PidStatus, StaticPidInfo, ThreadRef};
use bvisor::{AbsTgid, AbsTid, Notif, NsTid, Response, SandboxOptions, Supervisor};

const INIT_TID: i32 = 100;

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Test context with an isolated overlay and automatic cleanup.
struct TestContext {
    sup: Supervisor,
    pids: StaticPidInfo,
    next_id: AtomicU64,
    _temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let pids = StaticPidInfo::new();
        pids.insert(AbsTid(INIT_TID), pid_status(INIT_TID, 1, &[INIT_TID]));

        let options = SandboxOptions {
            overlay_root: temp_dir.path().join("overlay"),
            ..Default::default()
        };
        let sup = Supervisor::new(
            options,
            AbsTid(INIT_TID),
            Box::new(LocalMemory),
            Box::new(pids.clone()),
        )
        .expect("create supervisor");

        Self {
            sup,
            pids,
            next_id: AtomicU64::new(1),
            _temp_dir: temp_dir,
        }
    }

    fn syscall(&self, tid: i32, nr: i64, args: [u64; 6]) -> Response {
        let notif = Notif {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tid: AbsTid(tid),
            nr,
            args,
        };
        self.sup.handle(&notif).expect("no fatal supervisor error")
    }

    fn openat(&self, tid: i32, path: &str, flags: i32, mode: u32) -> Response {
        let cpath = CString::new(path).unwrap();
        self.syscall(
            tid,
            libc::SYS_openat,
            [
                libc::AT_FDCWD as u64,
                cpath.as_ptr() as u64,
                flags as u64,
                mode as u64,
                0,
                0,
            ],
        )
    }

    fn read(&self, tid: i32, vfd: i64, buf: &mut [u8]) -> Response {
        self.syscall(
            tid,
            libc::SYS_read,
            [vfd as u64, buf.as_mut_ptr() as u64, buf.len() as u64, 0, 0, 0],
        )
    }

    fn write(&self, tid: i32, vfd: i64, data: &[u8]) -> Response {
        self.syscall(
            tid,
            libc::SYS_write,
            [vfd as u64, data.as_ptr() as u64, data.len() as u64, 0, 0, 0],
        )
    }

    fn close(&self, tid: i32, vfd: i64) -> Response {
        self.syscall(tid, libc::SYS_close, [vfd as u64, 0, 0, 0, 0, 0])
    }

    fn register_child(&self, parent_tid: i32, child_tid: i32, flags: CloneFlags) -> ThreadRef {
        let parent = self.sup.registry().get(AbsTid(parent_tid)).unwrap();
        self.sup
            .registry()
            .register_child(&parent, AbsTid(child_tid), flags)
            .expect("register child")
    }
}

fn pid_status(tgid: i32, parent: i32, ns_tids: &[i32]) -> PidStatus {
    PidStatus {
        tgid: AbsTgid(tgid),
        parent: AbsTid(parent),
        ns_tids: ns_tids.iter().map(|t| NsTid(*t)).collect(),
    }
}

fn expect_val(response: Response) -> i64 {
    match response {
        Response::Return { val, errno: 0 } => val,
        other => panic!("expected success, got {:?}", other),
    }
}

fn expect_errno(response: Response, errno: i32) {
    match response {
        Response::Return { errno: got, .. } if got == errno => {}
        other => panic!("expected errno {}, got {:?}", errno, other),
    }
}

// ============================================================================
// PROC FILES
// ============================================================================

#[test]
fn proc_self_read_reports_ns_tid() {
    let ctx = TestContext::new();

    let vfd = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));
    assert!(vfd >= 3, "vfd {} should be past stdio", vfd);

    let mut buf = [0u8; 64];
    let n = expect_val(ctx.read(INIT_TID, vfd, &mut buf));
    assert_eq!(n, 4);
    assert_eq!(&buf[..4], b"100\n");

    assert_eq!(expect_val(ctx.close(INIT_TID, vfd)), 0);
}

#[test]
fn proc_pid_requires_visibility() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101]));
    ctx.register_child(INIT_TID, 101, CloneFlags::empty());

    // The child is visible from the root namespace under its NsTid.
    let vfd = expect_val(ctx.openat(INIT_TID, "/proc/101", libc::O_RDONLY, 0));
    let mut buf = [0u8; 16];
    let n = expect_val(ctx.read(INIT_TID, vfd, &mut buf));
    assert_eq!(&buf[..n as usize], b"101\n");

    // A pid nobody owns is ESRCH.
    expect_errno(
        ctx.openat(INIT_TID, "/proc/555", libc::O_RDONLY, 0),
        libc::ESRCH,
    );
}

#[test]
fn namespaced_proc_self_reads_inner_tid() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101, 1]));
    ctx.register_child(INIT_TID, 101, CloneFlags::CLONE_NEWPID);

    let vfd = expect_val(ctx.openat(101, "/proc/self", libc::O_RDONLY, 0));
    let mut buf = [0u8; 16];
    let n = expect_val(ctx.read(101, vfd, &mut buf));
    assert_eq!(&buf[..n as usize], b"1\n", "inner namespace sees tid 1");
}

// ============================================================================
// TMP OVERLAY
// ============================================================================

#[test]
fn tmp_write_read_cycle() {
    let ctx = TestContext::new();

    let vfd1 = expect_val(ctx.openat(
        INIT_TID,
        "/tmp/e2e.txt",
        libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
        0o644,
    ));
    assert_eq!(expect_val(ctx.write(INIT_TID, vfd1, b"hello e2e")), 9);
    expect_val(ctx.close(INIT_TID, vfd1));

    let vfd2 = expect_val(ctx.openat(INIT_TID, "/tmp/e2e.txt", libc::O_RDONLY, 0));
    let mut buf = [0u8; 64];
    let n = expect_val(ctx.read(INIT_TID, vfd2, &mut buf));
    assert_eq!(n, 9);
    assert_eq!(&buf[..9], b"hello e2e");
}

#[test]
fn tmp_spaces_are_disjoint_across_sandboxes() {
    let ctx_a = TestContext::new();
    let ctx_b = TestContext::new();

    let vfd = expect_val(ctx_a.openat(
        INIT_TID,
        "/tmp/only-in-a.txt",
        libc::O_WRONLY | libc::O_CREAT,
        0o644,
    ));
    expect_val(ctx_a.write(INIT_TID, vfd, b"a"));

    expect_errno(
        ctx_b.openat(INIT_TID, "/tmp/only-in-a.txt", libc::O_RDONLY, 0),
        libc::ENOENT,
    );
}

// ============================================================================
// VFD SEMANTICS
// ============================================================================

#[test]
fn vfds_are_monotonic_across_close() {
    let ctx = TestContext::new();

    let first = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));
    expect_val(ctx.close(INIT_TID, first));
    let second = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));
    assert!(second > first, "vfd {} not above {}", second, first);
}

#[test]
fn unknown_vfd_is_ebadf() {
    let ctx = TestContext::new();
    let mut buf = [0u8; 8];
    let iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    expect_errno(ctx.read(INIT_TID, 99, &mut buf), libc::EBADF);
    expect_errno(ctx.write(INIT_TID, 99, b"x"), libc::EBADF);
    expect_errno(ctx.close(INIT_TID, 99), libc::EBADF);
    expect_errno(
        ctx.syscall(
            INIT_TID,
            libc::SYS_readv,
            [99, &iov as *const libc::iovec as u64, 1, 0, 0, 0],
        ),
        libc::EBADF,
    );
    expect_errno(
        ctx.syscall(
            INIT_TID,
            libc::SYS_writev,
            [99, &iov as *const libc::iovec as u64, 1, 0, 0, 0],
        ),
        libc::EBADF,
    );
}

#[test]
fn dup_and_dup3_share_the_open_file() {
    let ctx = TestContext::new();
    let vfd = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));

    let dup = expect_val(ctx.syscall(INIT_TID, libc::SYS_dup, [vfd as u64, 0, 0, 0, 0, 0]));
    assert!(dup > vfd);

    // Reading through the dup advances the shared offset.
    let mut buf = [0u8; 2];
    expect_val(ctx.read(INIT_TID, dup, &mut buf));
    let mut rest = [0u8; 8];
    let n = expect_val(ctx.read(INIT_TID, vfd, &mut rest));
    assert_eq!(&rest[..n as usize], b"0\n");

    // dup3 to a chosen slot; same-fd is EINVAL.
    expect_errno(
        ctx.syscall(INIT_TID, libc::SYS_dup3, [vfd as u64, vfd as u64, 0, 0, 0, 0]),
        libc::EINVAL,
    );
    let chosen = expect_val(ctx.syscall(INIT_TID, libc::SYS_dup3, [vfd as u64, 40, 0, 0, 0, 0]));
    assert_eq!(chosen, 40);
    expect_val(ctx.close(INIT_TID, 40));
}

// ============================================================================
// PATH ROUTING
// ============================================================================

#[test]
fn traversal_into_sys_is_blocked() {
    let ctx = TestContext::new();
    expect_errno(
        ctx.openat(INIT_TID, "/tmp/../sys/class/net", libc::O_RDONLY, 0),
        libc::EPERM,
    );
}

#[test]
fn faccessat_respects_block_rules() {
    let ctx = TestContext::new();
    let cpath = CString::new("/run/secrets").unwrap();
    expect_errno(
        ctx.syscall(
            INIT_TID,
            libc::SYS_faccessat,
            [
                libc::AT_FDCWD as u64,
                cpath.as_ptr() as u64,
                libc::F_OK as u64,
                0,
                0,
                0,
            ],
        ),
        libc::EPERM,
    );
}

#[test]
fn denied_syscalls_are_enosys() {
    let ctx = TestContext::new();
    for nr in [libc::SYS_ptrace, libc::SYS_mount, libc::SYS_unshare, libc::SYS_bpf] {
        expect_errno(ctx.syscall(INIT_TID, nr, [0; 6]), libc::ENOSYS);
    }
}

#[test]
fn unrecognised_syscalls_continue() {
    let ctx = TestContext::new();
    assert!(ctx.syscall(INIT_TID, libc::SYS_sched_yield, [0; 6]).is_continue());
}

// ============================================================================
// FD TABLE SHARING ACROSS CLONES
// ============================================================================

#[test]
fn clone_files_shares_the_table() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101]));

    let vfd1 = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));
    ctx.register_child(INIT_TID, 101, CloneFlags::CLONE_FILES);

    // The child reads through the parent's vfd.
    let mut buf = [0u8; 16];
    let n = expect_val(ctx.read(101, vfd1, &mut buf));
    assert_eq!(&buf[..n as usize], b"100\n");

    // The parent reads through the child's vfd.
    let vfd2 = expect_val(ctx.openat(101, "/dev/null", libc::O_RDONLY, 0));
    let n = expect_val(ctx.read(INIT_TID, vfd2, &mut buf));
    assert_eq!(n, 0);
}

#[test]
fn fork_without_clone_files_isolates_tables() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101]));

    let vfd1 = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));
    ctx.register_child(INIT_TID, 101, CloneFlags::empty());

    // Parent closing its entry leaves the child's copy intact.
    expect_val(ctx.close(INIT_TID, vfd1));
    let mut buf = [0u8; 16];
    let n = expect_val(ctx.read(101, vfd1, &mut buf));
    assert_eq!(&buf[..n as usize], b"100\n");
    // And the parent's vfd really is gone.
    expect_errno(ctx.read(INIT_TID, vfd1, &mut buf), libc::EBADF);
}

// ============================================================================
// UNKNOWN CALLERS
// ============================================================================

#[test]
fn unknown_tid_is_esrch() {
    let ctx = TestContext::new();
    let mut buf = [0u8; 8];

    expect_errno(ctx.openat(999, "/proc/self", libc::O_RDONLY, 0), libc::ESRCH);
    expect_errno(ctx.read(999, 3, &mut buf), libc::ESRCH);
    expect_errno(ctx.write(999, 3, b"x"), libc::ESRCH);
    expect_errno(ctx.close(999, 3), libc::ESRCH);
}

// ============================================================================
// STAT
// ============================================================================

#[test]
fn fstat_on_stdio_continues() {
    let ctx = TestContext::new();
    for vfd in 0..=2u64 {
        let response = ctx.syscall(INIT_TID, libc::SYS_fstat, [vfd, 0, 0, 0, 0, 0]);
        assert!(response.is_continue(), "stdio vfd {} should continue", vfd);
    }
}

#[test]
fn fstat_reports_proc_attributes() {
    let ctx = TestContext::new();
    let vfd = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));

    // SAFETY: stat is plain data.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_fstat,
        [vfd as u64, &mut st as *mut libc::stat as u64, 0, 0, 0, 0],
    ));
    assert_eq!(st.st_size, 4);
    assert_eq!(st.st_mode, libc::S_IFREG | 0o444);
    assert_eq!(st.st_nlink, 1);
    assert_eq!(st.st_blksize, 4096);
}

#[test]
fn newfstatat_stats_tmp_files_by_path() {
    let ctx = TestContext::new();
    let vfd = expect_val(ctx.openat(
        INIT_TID,
        "/tmp/stat-me",
        libc::O_WRONLY | libc::O_CREAT,
        0o644,
    ));
    expect_val(ctx.write(INIT_TID, vfd, b"12345"));

    let cpath = CString::new("/tmp/stat-me").unwrap();
    // SAFETY: stat is plain data.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_newfstatat,
        [
            libc::AT_FDCWD as u64,
            cpath.as_ptr() as u64,
            &mut st as *mut libc::stat as u64,
            0,
            0,
            0,
        ],
    ));
    assert_eq!(st.st_size, 5);
}

// ============================================================================
// COW OVERLAY ISOLATION
// ============================================================================

#[test]
fn cow_sandboxes_materialise_independently() {
    // The host file must live outside /tmp so the router sends it down the
    // cow path rather than the tmp overlay.
    let host = TempDir::new_in(env!("CARGO_TARGET_TMPDIR")).unwrap();
    let host_file = host.path().join("shared.txt");
    std::fs::write(&host_file, b"host bytes").unwrap();
    let guest_path = host_file.to_str().unwrap();

    let ctx_a = TestContext::new();
    let ctx_b = TestContext::new();

    let vfd_a = expect_val(ctx_a.openat(INIT_TID, guest_path, libc::O_WRONLY, 0));
    let vfd_b = expect_val(ctx_b.openat(INIT_TID, guest_path, libc::O_WRONLY, 0));
    expect_val(ctx_a.write(INIT_TID, vfd_a, b"from a"));
    expect_val(ctx_b.write(INIT_TID, vfd_b, b"from b"));

    // Each sandbox sees its own copy; the host file is untouched.
    assert_eq!(std::fs::read(&host_file).unwrap(), b"host bytes");
    assert!(ctx_a.sup.overlay().cow_exists(guest_path));
    assert!(ctx_b.sup.overlay().cow_exists(guest_path));
    assert_ne!(
        ctx_a.sup.overlay().resolve_cow(guest_path),
        ctx_b.sup.overlay().resolve_cow(guest_path)
    );

    let mut buf = [0u8; 16];
    let vfd = expect_val(ctx_a.openat(INIT_TID, guest_path, libc::O_RDONLY, 0));
    let n = expect_val(ctx_a.read(INIT_TID, vfd, &mut buf));
    assert_eq!(&buf[..n as usize], b"from abytes");
}

// ============================================================================
// PROCESS IDS AND SIGNALS
// ============================================================================

#[test]
fn pid_family_reports_namespaced_ids() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101]));
    ctx.register_child(INIT_TID, 101, CloneFlags::empty());

    assert_eq!(expect_val(ctx.syscall(INIT_TID, libc::SYS_getpid, [0; 6])), 100);
    assert_eq!(expect_val(ctx.syscall(INIT_TID, libc::SYS_gettid, [0; 6])), 100);
    // The sandbox root's parent is outside the namespace.
    assert_eq!(expect_val(ctx.syscall(INIT_TID, libc::SYS_getppid, [0; 6])), 0);

    assert_eq!(expect_val(ctx.syscall(101, libc::SYS_getpid, [0; 6])), 101);
    assert_eq!(expect_val(ctx.syscall(101, libc::SYS_getppid, [0; 6])), 100);
}

#[test]
fn gettid_distinguishes_thread_members() {
    let ctx = TestContext::new();
    ctx.pids.insert(AbsTid(102), pid_status(INIT_TID, 1, &[102]));
    ctx.register_child(INIT_TID, 102, CloneFlags::CLONE_THREAD);

    assert_eq!(expect_val(ctx.syscall(102, libc::SYS_gettid, [0; 6])), 102);
    // getpid still names the group leader.
    assert_eq!(expect_val(ctx.syscall(102, libc::SYS_getpid, [0; 6])), 100);
}

#[test]
fn kill_rejects_nonpositive_and_invisible_targets() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101, 1]));
    ctx.register_child(INIT_TID, 101, CloneFlags::CLONE_NEWPID);

    expect_errno(
        ctx.syscall(INIT_TID, libc::SYS_kill, [0, libc::SIGTERM as u64, 0, 0, 0, 0]),
        libc::EINVAL,
    );
    expect_errno(
        ctx.syscall(
            INIT_TID,
            libc::SYS_kill,
            [(-5i64) as u64, libc::SIGTERM as u64, 0, 0, 0, 0],
        ),
        libc::EINVAL,
    );
    // The inner namespace cannot signal the outer init.
    expect_errno(
        ctx.syscall(101, libc::SYS_kill, [100, libc::SIGTERM as u64, 0, 0, 0, 0]),
        libc::ESRCH,
    );
    expect_errno(
        ctx.syscall(101, libc::SYS_tkill, [100, libc::SIGTERM as u64, 0, 0, 0, 0]),
        libc::ESRCH,
    );
}

// ============================================================================
// EXIT SEMANTICS
// ============================================================================

#[test]
fn exit_group_of_root_collects_the_sandbox() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101]));
    ctx.register_child(INIT_TID, 101, CloneFlags::empty());
    assert_eq!(ctx.sup.registry().len(), 2);

    let response = ctx.syscall(INIT_TID, libc::SYS_exit_group, [0; 6]);
    assert!(response.is_continue(), "exit must reach the kernel");
    assert!(ctx.sup.registry().is_empty());

    // Anything after death is ESRCH (the kernel table no longer backs it).
    ctx.pids.remove(AbsTid(INIT_TID));
    ctx.pids.remove(AbsTid(101));
    expect_errno(ctx.syscall(INIT_TID, libc::SYS_getpid, [0; 6]), libc::ESRCH);
}

#[test]
fn exit_of_child_leaves_parent_running() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101]));
    ctx.register_child(INIT_TID, 101, CloneFlags::empty());

    assert!(ctx.syscall(101, libc::SYS_exit, [0; 6]).is_continue());
    ctx.pids.remove(AbsTid(101));

    assert_eq!(ctx.sup.registry().len(), 1);
    assert_eq!(expect_val(ctx.syscall(INIT_TID, libc::SYS_getpid, [0; 6])), 100);
    expect_errno(ctx.syscall(101, libc::SYS_getpid, [0; 6]), libc::ESRCH);
}

// ============================================================================
// CWD, READLINK, PIPES, SYSTEM INFO
// ============================================================================

#[test]
fn chdir_and_getcwd_track_fs_info() {
    let ctx = TestContext::new();
    let cpath = CString::new("/tmp").unwrap();
    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_chdir,
        [cpath.as_ptr() as u64, 0, 0, 0, 0, 0],
    ));

    let mut buf = [0u8; 64];
    let n = expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_getcwd,
        [buf.as_mut_ptr() as u64, buf.len() as u64, 0, 0, 0, 0],
    ));
    assert_eq!(n, 5); // "/tmp" plus NUL
    assert_eq!(&buf[..5], b"/tmp\0");

    // Too-small buffer is ERANGE.
    expect_errno(
        ctx.syscall(
            INIT_TID,
            libc::SYS_getcwd,
            [buf.as_mut_ptr() as u64, 2, 0, 0, 0, 0],
        ),
        libc::ERANGE,
    );

    // Relative opens resolve against the new cwd.
    let rel = CString::new("cwd-file").unwrap();
    let vfd = expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_openat,
        [
            libc::AT_FDCWD as u64,
            rel.as_ptr() as u64,
            (libc::O_WRONLY | libc::O_CREAT) as u64,
            0o644,
            0,
            0,
        ],
    ));
    expect_val(ctx.write(INIT_TID, vfd, b"x"));
    assert!(ctx.sup.overlay().tmp_dir().join("cwd-file").exists());
}

#[test]
fn readlinkat_proc_self_names_the_caller() {
    let ctx = TestContext::new();
    let cpath = CString::new("/proc/self").unwrap();
    let mut buf = [0u8; 32];
    let n = expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_readlinkat,
        [
            libc::AT_FDCWD as u64,
            cpath.as_ptr() as u64,
            buf.as_mut_ptr() as u64,
            buf.len() as u64,
            0,
            0,
        ],
    ));
    assert_eq!(&buf[..n as usize], b"100");
}

#[test]
fn pipe2_roundtrip_through_vfds() {
    let ctx = TestContext::new();
    let mut pair = [0i32; 2];
    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_pipe2,
        [pair.as_mut_ptr() as u64, 0, 0, 0, 0, 0],
    ));
    let [read_vfd, write_vfd] = pair;
    assert!(read_vfd >= 3 && write_vfd > read_vfd);

    expect_val(ctx.write(INIT_TID, write_vfd as i64, b"through the pipe"));
    let mut buf = [0u8; 32];
    let n = expect_val(ctx.read(INIT_TID, read_vfd as i64, &mut buf));
    assert_eq!(&buf[..n as usize], b"through the pipe");
}

#[test]
fn readv_preserves_iovec_order() {
    let ctx = TestContext::new();
    let vfd = expect_val(ctx.openat(
        INIT_TID,
        "/tmp/vec.txt",
        libc::O_RDWR | libc::O_CREAT,
        0o644,
    ));
    expect_val(ctx.write(INIT_TID, vfd, b"abcdefgh"));
    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_lseek,
        [vfd as u64, 0, libc::SEEK_SET as u64, 0, 0, 0],
    ));

    let mut first = [0u8; 3];
    let mut second = [0u8; 5];
    let iovs = [
        libc::iovec {
            iov_base: first.as_mut_ptr() as *mut libc::c_void,
            iov_len: first.len(),
        },
        libc::iovec {
            iov_base: second.as_mut_ptr() as *mut libc::c_void,
            iov_len: second.len(),
        },
    ];
    let n = expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_readv,
        [vfd as u64, iovs.as_ptr() as u64, 2, 0, 0, 0],
    ));
    assert_eq!(n, 8);
    assert_eq!(&first, b"abc");
    assert_eq!(&second, b"defgh");
}

#[test]
fn pread_pwrite_leave_the_offset_alone() {
    let ctx = TestContext::new();
    let vfd = expect_val(ctx.openat(
        INIT_TID,
        "/tmp/pos.txt",
        libc::O_RDWR | libc::O_CREAT,
        0o644,
    ));
    expect_val(ctx.write(INIT_TID, vfd, b"0123456789"));

    let mut buf = [0u8; 4];
    let n = expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_pread64,
        [vfd as u64, buf.as_mut_ptr() as u64, buf.len() as u64, 2, 0, 0],
    ));
    assert_eq!(&buf[..n as usize], b"2345");

    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_pwrite64,
        [vfd as u64, b"XY".as_ptr() as u64, 2, 4, 0, 0],
    ));
    let pos = expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_lseek,
        [vfd as u64, 0, libc::SEEK_SET as u64, 0, 0, 0],
    ));
    assert_eq!(pos, 0);
    let mut all = [0u8; 16];
    let n = expect_val(ctx.read(INIT_TID, vfd as i64, &mut all));
    assert_eq!(&all[..n as usize], b"0123XY6789");
}

#[test]
fn uname_reports_virtual_hostname() {
    let ctx = TestContext::new();
    // SAFETY: utsname is plain data.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_uname,
        [&mut uts as *mut libc::utsname as u64, 0, 0, 0, 0, 0],
    ));

    let field = |raw: &[libc::c_char; 65]| -> String {
        raw.iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8 as char)
            .collect()
    };
    assert_eq!(field(&uts.sysname), "Linux");
    assert_eq!(field(&uts.nodename), "bvisor");
    assert!(!field(&uts.release).is_empty());
}

#[test]
fn sysinfo_reports_virtual_uptime() {
    let ctx = TestContext::new();
    // SAFETY: sysinfo is plain data.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    expect_val(ctx.syscall(
        INIT_TID,
        libc::SYS_sysinfo,
        [&mut info as *mut libc::sysinfo as u64, 0, 0, 0, 0, 0],
    ));
    assert_eq!(info.uptime, 60);
    assert_eq!(info.procs, 1);
    assert!(info.totalram > 0);
}

// ============================================================================
// FILE REFERENCES OUTLIVE TABLE SLOTS
// ============================================================================

#[test]
fn fork_clone_copies_table_entries() {
    let ctx = TestContext::new();
    ctx.pids
        .insert(AbsTid(101), pid_status(101, INIT_TID, &[101]));

    let vfd = expect_val(ctx.openat(INIT_TID, "/proc/self", libc::O_RDONLY, 0));
    let child = ctx.register_child(INIT_TID, 101, CloneFlags::empty());

    let parent = ctx.sup.registry().get(AbsTid(INIT_TID)).unwrap();
    let parent_file = parent.fd_table().get(bvisor::Vfd(vfd as i32)).unwrap();
    let child_file = child.fd_table().get(bvisor::Vfd(vfd as i32)).unwrap();
    assert!(!Arc::ptr_eq(&parent_file, &child_file));
    assert_eq!(parent_file.kind(), child_file.kind());
    assert_eq!(parent_file.opened_path(), child_file.opened_path());
}
