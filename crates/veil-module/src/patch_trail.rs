//! `PatchTrail`: bounded record of what the engine falsified.
//!
//! Entry/return callbacks must not log (stderr takes a lock, the host's
//! printer may too), so they push a `PatchEvent` into a lock-free
//! `ArrayQueue` instead. The host drains it from its own context and logs
//! at leisure. When the queue is full new events are dropped and counted;
//! the patch itself has already been applied either way.

use veil_core::call::CallId;
use veil_core::machine::ThreadKey;
use veil_core::status::NtStatus;

use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// One falsification, as applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch {
    /// ProcessDebugPort output zeroed.
    DebugPort { ok: bool },
    /// ProcessDebugFlags output set to 1.
    DebugFlags { ok: bool },
    /// ProcessDebugObjectHandle output zeroed, status forced to PORT_NOT_SET.
    DebugObjectHandle { ok: bool },
    /// WOW64 context debug registers zeroed; `zeroed` of 6 succeeded.
    Wow64DebugRegisters { zeroed: u8 },
    /// ThreadHideFromDebugger query output set to 1.
    HideFromDebuggerQuery { ok: bool },
    /// CONTEXT debug registers and branch trace zeroed; `zeroed` of 10.
    ContextDebugRegisters { zeroed: u8 },
    /// ThreadHideFromDebugger set swallowed; status returned instead.
    HideFromDebuggerSet(NtStatus),
    /// NtClose return value replaced.
    CloseStatus(NtStatus),
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ok = |b: bool| if b { "ok" } else { "fault" };
        match *self {
            Patch::DebugPort { ok: b } => write!(f, "ProcessDebugPort -> 0 ({})", ok(b)),
            Patch::DebugFlags { ok: b } => write!(f, "ProcessDebugFlags -> 1 ({})", ok(b)),
            Patch::DebugObjectHandle { ok: b } => {
                write!(f, "ProcessDebugObjectHandle -> NULL, STATUS_PORT_NOT_SET ({})", ok(b))
            }
            Patch::Wow64DebugRegisters { zeroed } => write!(f, "WOW64_CONTEXT Dr* zeroed {}/6", zeroed),
            Patch::HideFromDebuggerQuery { ok: b } => write!(f, "ThreadHideFromDebugger -> 1 ({})", ok(b)),
            Patch::ContextDebugRegisters { zeroed } => write!(f, "CONTEXT Dr*/LBR zeroed {}/10", zeroed),
            Patch::HideFromDebuggerSet(status) => write!(f, "ThreadHideFromDebugger set ignored -> {}", status),
            Patch::CloseStatus(status) => write!(f, "NtClose -> {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchEvent {
    pub call: CallId,
    pub thread: ThreadKey,
    pub patch: Patch,
}

impl fmt::Display for PatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.thread, self.call.service_name(), self.patch)
    }
}

pub struct PatchTrail {
    queue: ArrayQueue<PatchEvent>,
    dropped: AtomicU64,
}

impl PatchTrail {
    /// Trail holding up to `depth` undrained events.
    pub fn new(depth: usize) -> Self {
        Self {
            queue: ArrayQueue::new(depth.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record an event. Never blocks; drops it if the trail is full.
    #[inline]
    pub fn record(&self, call: CallId, thread: ThreadKey, patch: Patch) {
        if self.queue.push(PatchEvent { call, thread, patch }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pop(&self) -> Option<PatchEvent> {
        self.queue.pop()
    }

    /// Move up to `buf.len()` events into `buf`. Returns how many.
    pub fn poll(&self, buf: &mut [Option<PatchEvent>]) -> usize {
        let mut count = 0;
        while count < buf.len() {
            match self.queue.pop() {
                Some(event) => {
                    buf[count] = Some(event);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Take every pending event.
    pub fn drain(&self) -> Vec<PatchEvent> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Events lost to a full trail since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
