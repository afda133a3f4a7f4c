//! statx -> struct stat conversion for the guest ABI.
//!
//! Backends report statx; the guest expects the fixed `struct stat` layout of
//! its architecture. Conversion honours each statx mask bit and recombines
//! the split major/minor device numbers into the full makedev encoding.

/// Linux makedev encoding:
/// `(minor & 0xff) | (major & 0xfff) << 8 | (minor & ~0xff) << 12 | (major & ~0xfff) << 32`.
pub fn makedev(major: u32, minor: u32) -> u64 {
    let major = major as u64;
    let minor = minor as u64;
    (minor & 0xff) | ((major & 0xfff) << 8) | ((minor & !0xff) << 12) | ((major & !0xfff) << 32)
}

/// Build the guest-visible `struct stat` from a statx record.
///
/// Fields whose mask bit is unset stay zero; `st_dev`/`st_rdev` are always
/// recombined since statx carries them unconditionally.
pub fn statx_to_stat(stx: &libc::statx) -> libc::stat {
    // SAFETY: struct stat is plain data; zero is a valid baseline.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let mask = stx.stx_mask;

    st.st_dev = makedev(stx.stx_dev_major, stx.stx_dev_minor);
    st.st_rdev = makedev(stx.stx_rdev_major, stx.stx_rdev_minor);
    st.st_blksize = stx.stx_blksize as libc::blksize_t;

    if mask & libc::STATX_INO != 0 {
        st.st_ino = stx.stx_ino;
    }
    if mask & libc::STATX_NLINK != 0 {
        st.st_nlink = stx.stx_nlink as libc::nlink_t;
    }

    let mut mode: u32 = 0;
    if mask & libc::STATX_TYPE != 0 {
        mode |= u32::from(stx.stx_mode) & libc::S_IFMT;
    }
    if mask & libc::STATX_MODE != 0 {
        mode |= u32::from(stx.stx_mode) & 0o7777;
    }
    st.st_mode = mode;

    if mask & libc::STATX_UID != 0 {
        st.st_uid = stx.stx_uid;
    }
    if mask & libc::STATX_GID != 0 {
        st.st_gid = stx.stx_gid;
    }
    if mask & libc::STATX_SIZE != 0 {
        st.st_size = stx.stx_size as libc::off_t;
    }
    if mask & libc::STATX_BLOCKS != 0 {
        st.st_blocks = stx.stx_blocks as libc::blkcnt_t;
    }
    if mask & libc::STATX_ATIME != 0 {
        st.st_atime = stx.stx_atime.tv_sec;
        st.st_atime_nsec = stx.stx_atime.tv_nsec as i64;
    }
    if mask & libc::STATX_MTIME != 0 {
        st.st_mtime = stx.stx_mtime.tv_sec;
        st.st_mtime_nsec = stx.stx_mtime.tv_nsec as i64;
    }
    if mask & libc::STATX_CTIME != 0 {
        st.st_ctime = stx.stx_ctime.tv_sec;
        st.st_ctime_nsec = stx.stx_ctime.tv_nsec as i64;
    }

    st
}
