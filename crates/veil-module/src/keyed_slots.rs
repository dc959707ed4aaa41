//! `KeyedSlots`: `SlotStore` keyed explicitly by `ThreadKey`.
//!
//! For hosts that deliver entry and return on different OS threads (a
//! hypervisor-side host, a replay harness). All threads share one map
//! behind a `SpinLock`; critical sections are a single hash lookup.
//! A thread's row is removed once its last valid slot is taken, so the
//! map only holds calls that are in flight.

use veil_core::machine::ThreadKey;
use veil_core::slots::{SlotId, SlotStore};
use veil_core::spinlock::SpinLock;

use std::collections::HashMap;

type Row = [Option<u64>; SlotId::COUNT];

#[derive(Default)]
pub struct KeyedSlots {
    rows: SpinLock<HashMap<ThreadKey, Row>>,
}

impl KeyedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one valid slot.
    pub fn threads_in_flight(&self) -> usize {
        self.rows.lock().len()
    }
}

impl SlotStore for KeyedSlots {
    fn set(&self, thread: ThreadKey, slot: SlotId, value: u64) {
        let mut rows = self.rows.lock();
        rows.entry(thread).or_insert([None; SlotId::COUNT])[slot.index()] = Some(value);
    }

    fn take(&self, thread: ThreadKey, slot: SlotId) -> Option<u64> {
        let mut rows = self.rows.lock();
        let row = rows.get_mut(&thread)?;
        let value = row[slot.index()].take();
        if row.iter().all(Option::is_none) {
            rows.remove(&thread);
        }
        value
    }

    fn clear(&self, thread: ThreadKey) {
        self.rows.lock().remove(&thread);
    }
}
