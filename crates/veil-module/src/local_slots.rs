//! `LocalSlots`: default `SlotStore` implementation.
//!
//! Each OS thread owns a short list of rows, one per (store, `ThreadKey`)
//! pair with a call in flight. A host that multiplexes several logical
//! threads onto one OS thread gets one row per logical thread, so a call
//! entered by one of them never displaces another's pending slots. Rows
//! are dropped as soon as their last slot is taken.
//!
//! Lookup is one thread-local access plus a scan of the live rows, which
//! is usually a single row. No locks.

use veil_core::machine::ThreadKey;
use veil_core::slots::{SlotId, SlotStore};

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};

struct Row {
    store: u32,
    thread: ThreadKey,
    values: [Option<u64>; SlotId::COUNT],
}

impl Row {
    fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

thread_local! {
    static ROWS: RefCell<Vec<Row>> = const { RefCell::new(Vec::new()) };
}

static NEXT_STORE_ID: AtomicU32 = AtomicU32::new(1);

pub struct LocalSlots {
    id: u32,
}

impl LocalSlots {
    pub fn new() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Logical threads of this store with a call in flight on the current
    /// OS thread.
    pub fn threads_in_flight(&self) -> usize {
        ROWS.with(|rows| rows.borrow().iter().filter(|row| row.store == self.id).count())
    }

    fn position(&self, rows: &[Row], thread: ThreadKey) -> Option<usize> {
        rows.iter().position(|row| row.store == self.id && row.thread == thread)
    }
}

impl Default for LocalSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotStore for LocalSlots {
    #[inline]
    fn set(&self, thread: ThreadKey, slot: SlotId, value: u64) {
        ROWS.with(|rows| {
            let mut rows = rows.borrow_mut();
            let at = match self.position(&rows, thread) {
                Some(at) => at,
                None => {
                    rows.push(Row { store: self.id, thread, values: [None; SlotId::COUNT] });
                    rows.len() - 1
                }
            };
            rows[at].values[slot.index()] = Some(value);
        });
    }

    #[inline]
    fn take(&self, thread: ThreadKey, slot: SlotId) -> Option<u64> {
        ROWS.with(|rows| {
            let mut rows = rows.borrow_mut();
            let at = self.position(&rows, thread)?;
            let value = rows[at].values[slot.index()].take();
            if rows[at].is_empty() {
                rows.swap_remove(at);
            }
            value
        })
    }

    fn clear(&self, thread: ThreadKey) {
        ROWS.with(|rows| {
            let mut rows = rows.borrow_mut();
            if let Some(at) = self.position(&rows, thread) {
                rows.swap_remove(at);
            }
        });
    }
}
