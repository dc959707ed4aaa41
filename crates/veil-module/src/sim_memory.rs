//! `SimMemory`: sparse simulated address space.
//!
//! Pages are 4 KiB and carry a protection. Accesses through
//! `MemoryAccess` honour protection, are all-or-nothing across page
//! boundaries and are counted, so tests can assert "no writes happened".
//! `poke`/`peek` model the real service and the caller touching memory;
//! they bypass protection and are not counted.

use veil_core::memory::MemoryAccess;
use veil_core::spinlock::SpinLock;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const PAGE_SIZE: u64 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    NoAccess,
    ReadOnly,
    ReadWrite,
}

impl Protection {
    fn readable(self) -> bool {
        !matches!(self, Protection::NoAccess)
    }

    fn writable(self) -> bool {
        matches!(self, Protection::ReadWrite)
    }
}

struct Page {
    prot: Protection,
    data: Box<[u8; PAGE_SIZE as usize]>,
}

#[derive(Default)]
pub struct SimMemory {
    pages: SpinLock<HashMap<u64, Page>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// Page numbers covering `[addr, addr + len)`, or `None` on overflow.
fn span(addr: u64, len: usize) -> Option<std::ops::RangeInclusive<u64>> {
    let last = addr.checked_add(len.max(1) as u64 - 1)?;
    Some(addr / PAGE_SIZE..=last / PAGE_SIZE)
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map zeroed pages covering `[addr, addr + len)`. Pages already mapped
    /// keep their contents and take the new protection.
    pub fn map(&self, addr: u64, len: usize, prot: Protection) {
        let Some(pages) = span(addr, len) else { return };
        let mut table = self.pages.lock();
        for pn in pages {
            table
                .entry(pn)
                .and_modify(|p| p.prot = prot)
                .or_insert_with(|| Page {
                    prot,
                    data: Box::new([0u8; PAGE_SIZE as usize]),
                });
        }
    }

    pub fn unmap(&self, addr: u64, len: usize) {
        let Some(pages) = span(addr, len) else { return };
        let mut table = self.pages.lock();
        for pn in pages {
            table.remove(&pn);
        }
    }

    /// Change protection of mapped pages. Returns false if any is unmapped.
    pub fn protect(&self, addr: u64, len: usize, prot: Protection) -> bool {
        let Some(pages) = span(addr, len) else { return false };
        let mut table = self.pages.lock();
        if !pages.clone().all(|pn| table.contains_key(&pn)) {
            return false;
        }
        for pn in pages {
            if let Some(page) = table.get_mut(&pn) {
                page.prot = prot;
            }
        }
        true
    }

    /// Write without protection checks or accounting.
    pub fn poke(&self, addr: u64, bytes: &[u8]) -> bool {
        self.transfer_out(addr, bytes, false)
    }

    /// Read without protection checks or accounting.
    pub fn peek(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.transfer_in(addr, &mut buf, false).then_some(buf)
    }

    pub fn peek_u32(&self, addr: u64) -> Option<u32> {
        let raw = self.peek(addr, 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn peek_u64(&self, addr: u64) -> Option<u64> {
        let raw = self.peek(addr, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw);
        Some(u64::from_le_bytes(bytes))
    }

    /// `MemoryAccess::read` calls so far, successful or not.
    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// `MemoryAccess::write` calls so far, successful or not.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn transfer_in(&self, addr: u64, buf: &mut [u8], check: bool) -> bool {
        if buf.is_empty() {
            return true;
        }
        let Some(pages) = span(addr, buf.len()) else { return false };
        let table = self.pages.lock();
        let ok = pages
            .clone()
            .all(|pn| table.get(&pn).is_some_and(|p| !check || p.prot.readable()));
        if !ok {
            return false;
        }
        let mut cursor = addr;
        let mut done = 0;
        while done < buf.len() {
            let off = (cursor % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - off).min(buf.len() - done);
            if let Some(page) = table.get(&(cursor / PAGE_SIZE)) {
                buf[done..done + chunk].copy_from_slice(&page.data[off..off + chunk]);
            }
            done += chunk;
            cursor += chunk as u64;
        }
        true
    }

    fn transfer_out(&self, addr: u64, bytes: &[u8], check: bool) -> bool {
        if bytes.is_empty() {
            return true;
        }
        let Some(pages) = span(addr, bytes.len()) else { return false };
        let mut table = self.pages.lock();
        let ok = pages
            .clone()
            .all(|pn| table.get(&pn).is_some_and(|p| !check || p.prot.writable()));
        if !ok {
            return false;
        }
        let mut cursor = addr;
        let mut done = 0;
        while done < bytes.len() {
            let off = (cursor % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - off).min(bytes.len() - done);
            if let Some(page) = table.get_mut(&(cursor / PAGE_SIZE)) {
                page.data[off..off + chunk].copy_from_slice(&bytes[done..done + chunk]);
            }
            done += chunk;
            cursor += chunk as u64;
        }
        true
    }
}

impl MemoryAccess for SimMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> bool {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.transfer_in(addr, buf, true)
    }

    fn write(&self, addr: u64, buf: &[u8]) -> bool {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.transfer_out(addr, buf, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_access_fails() {
        let mem = SimMemory::new();
        assert!(!mem.write_u64(0x1000, 0));
        assert_eq!(mem.read_u32(0x1000), None);
        assert_eq!(mem.write_calls(), 1);
        assert_eq!(mem.read_calls(), 1);
    }

    #[test]
    fn read_write_round_trip() {
        let mem = SimMemory::new();
        mem.map(0x10_000, 0x100, Protection::ReadWrite);
        assert!(mem.write_u32(0x10_010, 0xDEAD_BEEF));
        assert_eq!(mem.peek_u32(0x10_010), Some(0xDEAD_BEEF));
        assert_eq!(mem.read_u64(0x10_010), Some(0xDEAD_BEEF));
    }

    #[test]
    fn cross_page_write_is_all_or_nothing() {
        let mem = SimMemory::new();
        mem.map(0x2000, 0x1000, Protection::ReadWrite);
        mem.map(0x3000, 0x1000, Protection::ReadOnly);
        assert!(mem.poke(0x2FFC, &[0x11; 8]));

        assert!(!mem.write_u64(0x2FFC, 0));
        assert_eq!(mem.peek(0x2FFC, 8), Some(vec![0x11; 8]));

        assert!(mem.protect(0x3000, 1, Protection::ReadWrite));
        assert!(mem.write_u64(0x2FFC, 0));
        assert_eq!(mem.peek_u64(0x2FFC), Some(0));
    }

    #[test]
    fn no_access_blocks_reads_not_peeks() {
        let mem = SimMemory::new();
        mem.map(0x5000, 16, Protection::NoAccess);
        assert!(mem.poke(0x5000, &[7]));
        assert_eq!(mem.read_u32(0x5000), None);
        assert_eq!(mem.peek(0x5000, 1), Some(vec![7]));
    }

    #[test]
    fn unmap_and_overflow() {
        let mem = SimMemory::new();
        mem.map(0x7000, 8, Protection::ReadWrite);
        mem.unmap(0x7000, 8);
        assert!(!mem.poke(0x7000, &[1]));
        assert!(!mem.write(u64::MAX - 2, &[0; 8]));
        assert!(!mem.protect(0x9000, 8, Protection::ReadOnly));
    }
}
