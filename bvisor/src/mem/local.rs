//! In-process guest memory for tests and single-process use.

use crate::ids::AbsTid;
use bvisor_shared::errors::BvisorResult;

use super::GuestMemory;

/// Dereferences guest addresses in the supervisor's own address space.
///
/// Handler logic is identical whether the "guest" buffer lives in another
/// process or in a local test fixture; this implementation makes the latter
/// possible. The caller owns address validity: tests pass pointers to
/// buffers they keep alive for the duration of the call.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMemory;

impl GuestMemory for LocalMemory {
    fn read_bytes(&self, _pid: AbsTid, addr: u64, buf: &mut [u8]) -> BvisorResult<()> {
        // SAFETY: the caller hands in addresses of live local buffers with at
        // least buf.len() readable bytes; that is this type's contract. Callers
        // such as read_cstring read in fixed-size chunks without knowing the
        // exact live length, so in this single-address-space bridge the chunk
        // can legitimately overlap the destination buffer itself; `copy`
        // (memmove semantics) handles that, unlike `copy_nonoverlapping`.
        unsafe {
            std::ptr::copy(addr as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    fn write_bytes(&self, _pid: AbsTid, addr: u64, data: &[u8]) -> BvisorResult<()> {
        // SAFETY: same contract as read_bytes, for writable bytes.
        unsafe {
            std::ptr::copy(data.as_ptr(), addr as *mut u8, data.len());
        }
        Ok(())
    }
}
