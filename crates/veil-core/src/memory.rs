//! Fault-contained memory access.
//!
//! Every patch the engine makes to caller-owned memory goes through a
//! `MemoryAccess`. The service never faults the caller on a bad address;
//! it reports `false` and leaves the target untouched.
//!
//! # Implementors
//!
//! - `ProcessVmMemory` (veil-module, Linux): `process_vm_readv` /
//!   `process_vm_writev` against the current process.
//! - `SimMemory` (veil-module): sparse simulated address space with write
//!   accounting, for tests and the simulated host.

/// Bounded read/write into arbitrary memory.
///
/// **Contract:**
/// - Returns `true` only if all of `buf` was transferred.
/// - A failed access has no partial effect visible to the caller of the
///   intercepted service.
/// - Never blocks indefinitely.
pub trait MemoryAccess: Send + Sync {
    /// Copy `buf.len()` bytes from `addr` into `buf`.
    fn read(&self, addr: u64, buf: &mut [u8]) -> bool;

    /// Copy `buf` to `addr`.
    fn write(&self, addr: u64, buf: &[u8]) -> bool;

    fn read_u32(&self, addr: u64) -> Option<u32> {
        let mut raw = [0u8; 4];
        self.read(addr, &mut raw).then(|| u32::from_le_bytes(raw))
    }

    fn read_u64(&self, addr: u64) -> Option<u64> {
        let mut raw = [0u8; 8];
        self.read(addr, &mut raw).then(|| u64::from_le_bytes(raw))
    }

    fn write_u8(&self, addr: u64, value: u8) -> bool {
        self.write(addr, &[value])
    }

    fn write_u32(&self, addr: u64, value: u32) -> bool {
        self.write(addr, &value.to_le_bytes())
    }

    fn write_u64(&self, addr: u64, value: u64) -> bool {
        self.write(addr, &value.to_le_bytes())
    }

    /// Zero `len` bytes at `addr` in a single bounded write.
    fn zero(&self, addr: u64, len: usize) -> bool {
        match len {
            1 => self.write(addr, &[0u8; 1]),
            2 => self.write(addr, &[0u8; 2]),
            4 => self.write(addr, &[0u8; 4]),
            8 => self.write(addr, &[0u8; 8]),
            _ => self.write(addr, &vec![0u8; len]),
        }
    }
}

impl<T: MemoryAccess + ?Sized> MemoryAccess for std::sync::Arc<T> {
    #[inline]
    fn read(&self, addr: u64, buf: &mut [u8]) -> bool {
        (**self).read(addr, buf)
    }

    #[inline]
    fn write(&self, addr: u64, buf: &[u8]) -> bool {
        (**self).write(addr, buf)
    }
}
