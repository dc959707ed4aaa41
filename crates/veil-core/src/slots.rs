//! Per-thread slots carrying context from entry to return.
//!
//! Entry and return are separate host invocations, possibly with other
//! activity interleaved, so neither may rely on the other's locals. The
//! entry handler parks what it extracted in slots; the return handler of
//! the same call instance takes them back out.
//!
//! # Implementors
//!
//! - `LocalSlots` (veil-module): OS thread-local rows, one per `ThreadKey`
//!   with a call in flight.
//! - `KeyedSlots` (veil-module): explicit map keyed by `ThreadKey` behind a
//!   spinlock. For hosts whose callbacks do not run on the caller's thread.

use crate::call::CallId;
use crate::machine::ThreadKey;

/// Slot identifiers. The table is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotId {
    ProcessInfoClass = 0,
    ProcessInfoPtr = 1,
    ProcessInfoLenPtr = 2,
    ContextThreadPtr = 3,
    ThreadInfoClass = 4,
    ThreadInfoPtr = 5,
    ThreadInfoLenPtr = 6,
    CloseReturnValue = 7,
    CloseOverwriteFlag = 8,
}

impl SlotId {
    /// Number of slots; backing arrays are sized by this.
    pub const COUNT: usize = 9;

    pub const ALL: [SlotId; SlotId::COUNT] = [
        SlotId::ProcessInfoClass,
        SlotId::ProcessInfoPtr,
        SlotId::ProcessInfoLenPtr,
        SlotId::ContextThreadPtr,
        SlotId::ThreadInfoClass,
        SlotId::ThreadInfoPtr,
        SlotId::ThreadInfoLenPtr,
        SlotId::CloseReturnValue,
        SlotId::CloseOverwriteFlag,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The call whose entry writes this slot and whose return consumes it.
    pub const fn owner(self) -> CallId {
        match self {
            SlotId::ProcessInfoClass | SlotId::ProcessInfoPtr | SlotId::ProcessInfoLenPtr => {
                CallId::QueryInformationProcess
            }
            SlotId::ContextThreadPtr => CallId::GetContextThread,
            SlotId::ThreadInfoClass | SlotId::ThreadInfoPtr | SlotId::ThreadInfoLenPtr => {
                CallId::QueryInformationThread
            }
            SlotId::CloseReturnValue | SlotId::CloseOverwriteFlag => CallId::Close,
        }
    }
}

/// Thread-scoped value store.
///
/// **Contract:**
/// - Values are isolated per `ThreadKey`.
/// - `take` consumes: a second `take` of the same slot without an
///   intervening `set` returns `None`.
/// - Neither method may block for longer than a short critical section.
pub trait SlotStore: Send + Sync {
    /// Store `value` in `slot` for `thread`, replacing any stale value.
    fn set(&self, thread: ThreadKey, slot: SlotId, value: u64);

    /// Remove and return the value of `slot` for `thread`, if valid.
    fn take(&self, thread: ThreadKey, slot: SlotId) -> Option<u64>;

    /// Invalidate every slot of `thread`.
    fn clear(&self, thread: ThreadKey) {
        for slot in SlotId::ALL {
            let _ = self.take(thread, slot);
        }
    }
}

impl<T: SlotStore + ?Sized> SlotStore for std::sync::Arc<T> {
    #[inline]
    fn set(&self, thread: ThreadKey, slot: SlotId, value: u64) {
        (**self).set(thread, slot, value)
    }

    #[inline]
    fn take(&self, thread: ThreadKey, slot: SlotId) -> Option<u64> {
        (**self).take(thread, slot)
    }
}
