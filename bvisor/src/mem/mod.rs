//! Cross-process guest memory bridge.
//!
//! Provides memory access implementations:
//! - `ProcessVm` - transfers bytes across address spaces with
//!   process_vm_readv(2)/process_vm_writev(2)
//! - `LocalMemory` - dereferences addresses in the supervisor's own process,
//!   so handler logic can be exercised without a real guest

mod local;
mod process;

pub use local::LocalMemory;
pub use process::ProcessVm;

use crate::ids::AbsTid;
use bvisor_shared::errors::{BvisorError, BvisorResult};
use std::mem::{MaybeUninit, size_of};

/// Longest C string the bridge will read out of guest memory. Matches the
/// kernel's PATH_MAX.
pub const MAX_CSTRING: usize = 4096;

const PAGE_SIZE: u64 = 4096;

/// Byte-level access to a guest address space.
///
/// Each call is a single cross-process transfer: it either moves the whole
/// range or fails with [`BvisorError::MemoryFault`]. Implementations are
/// selected at supervisor construction time.
pub trait GuestMemory: Send + Sync {
    fn read_bytes(&self, pid: AbsTid, addr: u64, buf: &mut [u8]) -> BvisorResult<()>;
    fn write_bytes(&self, pid: AbsTid, addr: u64, data: &[u8]) -> BvisorResult<()>;
}

/// Read one `T` out of guest memory.
///
/// `T` must be a plain-old-data type for which every bit pattern is a valid
/// value (integers, `#[repr(C)]` structs of integers). All callers in this
/// crate satisfy that.
pub fn read_value<T: Copy>(mem: &dyn GuestMemory, pid: AbsTid, addr: u64) -> BvisorResult<T> {
    let mut value = MaybeUninit::<T>::uninit();
    // SAFETY: MaybeUninit<T> owns size_of::<T>() writable bytes and u8 has
    // no alignment requirement.
    let buf = unsafe {
        std::slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, size_of::<T>())
    };
    mem.read_bytes(pid, addr, buf)?;
    // SAFETY: read_bytes filled every byte, and T admits any bit pattern
    // per the contract above.
    Ok(unsafe { value.assume_init() })
}

/// Write one `T` into guest memory.
pub fn write_value<T: Copy>(
    mem: &dyn GuestMemory,
    pid: AbsTid,
    addr: u64,
    value: &T,
) -> BvisorResult<()> {
    // SAFETY: a &T is size_of::<T>() readable bytes.
    let data =
        unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) };
    mem.write_bytes(pid, addr, data)
}

/// Read a NUL-terminated string out of guest memory.
///
/// Reads chunk-wise, never crossing a page boundary in a single transfer, so
/// a string ending just before an unmapped page does not fault spuriously.
/// Strings longer than [`MAX_CSTRING`] fail with `ENAMETOOLONG`.
pub fn read_cstring(mem: &dyn GuestMemory, pid: AbsTid, addr: u64) -> BvisorResult<String> {
    let mut out: Vec<u8> = Vec::new();
    let mut cursor = addr;

    while out.len() < MAX_CSTRING {
        let page_left = (PAGE_SIZE - (cursor % PAGE_SIZE)) as usize;
        let want = page_left.min(256).min(MAX_CSTRING - out.len());
        let mut chunk = vec![0u8; want];
        mem.read_bytes(pid, cursor, &mut chunk)?;

        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            out.extend_from_slice(&chunk[..nul]);
            return String::from_utf8(out).map_err(|_| {
                BvisorError::InvalidArgument("path is not valid UTF-8".to_string())
            });
        }
        out.extend_from_slice(&chunk);
        cursor += want as u64;
    }

    Err(BvisorError::Os(nix::errno::Errno::ENAMETOOLONG))
}
