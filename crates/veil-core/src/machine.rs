//! Argument/register view of an intercepted call.
//!
//! The host hands one `MachineState` to each callback. It is not owned by
//! the engine and does not survive between entry and return, which is why
//! cross-phase context goes through the `SlotStore`.

use core::fmt;

/// Identity of the logical thread making a call.
///
/// Slots are keyed by it, so two threads making the same kind of call
/// never observe each other's state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadKey(u64);

impl ThreadKey {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        ThreadKey(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadKey({})", self.0)
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Register-level view of one intercepted call.
///
/// On x64 the first four arguments come from rcx, rdx, r8, r9 and the rest
/// from the caller's stack; implementors hide that split behind `index`.
pub trait MachineState {
    /// Raw value of argument `index` (0-based). Out-of-range reads return 0.
    fn read_argument(&self, index: usize) -> u64;

    /// Current return register.
    fn read_return_value(&self) -> u64;

    /// Overwrite the return register.
    fn write_return_value(&mut self, value: u64);

    /// Thread the call is executing on.
    fn thread_key(&self) -> ThreadKey;
}

/// Call-site metadata the host supplies alongside each callback.
///
/// The decision engine only consults `process_name` (target selection);
/// the rest is for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    pub process_name: String,
    pub process_id: u32,
    pub thread_id: u32,
}

impl CallerInfo {
    pub fn new(process_name: impl Into<String>, process_id: u32, thread_id: u32) -> Self {
        Self {
            process_name: process_name.into(),
            process_id,
            thread_id,
        }
    }

    /// Slot key for this caller's thread.
    #[inline]
    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey::new(((self.process_id as u64) << 32) | self.thread_id as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_key_distinguishes_processes() {
        let a = CallerInfo::new("a.exe", 10, 7);
        let b = CallerInfo::new("b.exe", 11, 7);
        assert_ne!(a.thread_key(), b.thread_key());
        assert_eq!(a.thread_key(), CallerInfo::new("renamed", 10, 7).thread_key());
    }

    #[test]
    fn thread_key_formatting() {
        let k = ThreadKey::new(42);
        assert_eq!(format!("{}", k), "42");
        assert_eq!(format!("{:?}", k), "ThreadKey(42)");
    }
}
