//! `ProcessVmMemory`: `MemoryAccess` over real process memory.
//!
//! Uses `process_vm_readv` / `process_vm_writev`, which report a bad
//! address as `EFAULT` instead of delivering SIGSEGV. That is exactly the
//! fault containment the engine needs when it patches caller buffers.
//!
//! Writes are all-or-nothing: the target range is read first (which also
//! proves it is mapped), and if the kernel only manages a partial write the
//! prefix that did land is put back.

use veil_core::machine::ThreadKey;
use veil_core::memory::MemoryAccess;

use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;
use std::io::{IoSlice, IoSliceMut};

pub struct ProcessVmMemory {
    pid: Pid,
}

impl ProcessVmMemory {
    /// Memory of the calling process.
    pub fn current() -> Self {
        Self { pid: Pid::this() }
    }

    /// Memory of another process. Requires ptrace-level permission on it.
    pub fn for_pid(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    fn remote(addr: u64, len: usize) -> Option<RemoteIoVec> {
        let base = usize::try_from(addr).ok()?;
        base.checked_add(len)?;
        Some(RemoteIoVec { base, len })
    }

    fn write_raw(&self, remote: RemoteIoVec, buf: &[u8]) -> usize {
        let local = [IoSlice::new(buf)];
        process_vm_writev(self.pid, &local, &[remote]).unwrap_or(0)
    }
}

impl MemoryAccess for ProcessVmMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> bool {
        if buf.is_empty() {
            return true;
        }
        let Some(remote) = Self::remote(addr, buf.len()) else {
            return false;
        };
        let len = buf.len();
        let mut local = [IoSliceMut::new(buf)];
        matches!(process_vm_readv(self.pid, &mut local, &[remote]), Ok(n) if n == len)
    }

    fn write(&self, addr: u64, buf: &[u8]) -> bool {
        if buf.is_empty() {
            return true;
        }
        let Some(remote) = Self::remote(addr, buf.len()) else {
            return false;
        };

        let mut original = vec![0u8; buf.len()];
        if !self.read(addr, &mut original) {
            return false;
        }

        let base = remote.base;
        let written = self.write_raw(remote, buf);
        if written == buf.len() {
            return true;
        }
        if written > 0 {
            // Read-only tail: undo the prefix that landed.
            let prefix = RemoteIoVec { base, len: written };
            self.write_raw(prefix, &original[..written]);
        }
        false
    }
}

/// `ThreadKey` of the calling OS thread: pid in the high half, tid in the
/// low half, the same packing `CallerInfo::thread_key` uses.
pub fn current_thread_key() -> ThreadKey {
    let pid = std::process::id() as u64;
    // Safety: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as u64;
    ThreadKey::new((pid << 32) | (tid & 0xFFFF_FFFF))
}
