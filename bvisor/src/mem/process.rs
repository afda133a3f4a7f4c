//! Guest memory access over process_vm_readv(2)/process_vm_writev(2).

use std::io::{IoSlice, IoSliceMut};

use nix::sys::uio::{RemoteIoVec, process_vm_readv, process_vm_writev};
use nix::unistd::Pid;

use crate::ids::AbsTid;
use bvisor_shared::errors::{BvisorError, BvisorResult};

use super::GuestMemory;

/// Transfers bytes across address spaces in a single kernel call per
/// operation, which keeps each read/write atomic from the supervisor's
/// perspective.
///
/// Requires the supervisor to have ptrace-read capability over the guest;
/// a sibling process spawned by the same parent has it by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessVm;

impl ProcessVm {
    pub fn new() -> Self {
        ProcessVm
    }
}

impl GuestMemory for ProcessVm {
    fn read_bytes(&self, pid: AbsTid, addr: u64, buf: &mut [u8]) -> BvisorResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let len = buf.len();
        let local = &mut [IoSliceMut::new(buf)];
        let remote = &[RemoteIoVec {
            base: addr as usize,
            len,
        }];
        match process_vm_readv(Pid::from_raw(pid.0), local, remote) {
            Ok(n) if n == len => Ok(()),
            _ => Err(BvisorError::MemoryFault { addr, len }),
        }
    }

    fn write_bytes(&self, pid: AbsTid, addr: u64, data: &[u8]) -> BvisorResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len();
        let local = &[IoSlice::new(data)];
        let remote = &[RemoteIoVec {
            base: addr as usize,
            len,
        }];
        match process_vm_writev(Pid::from_raw(pid.0), local, remote) {
            Ok(n) if n == len => Ok(()),
            _ => Err(BvisorError::MemoryFault { addr, len }),
        }
    }
}
