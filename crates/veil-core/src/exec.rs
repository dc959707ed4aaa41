//! Execution context services.
//!
//! Facts about the current caller the engine needs to mirror kernel
//! behaviour: which mode the call came from, whether the process has a
//! debug port, the global flags, and the ability to run a short probe at
//! raised execution priority.
//!
//! # Implementors
//!
//! - `SimKernel` (veil-module).

/// KPROCESSOR_MODE of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessorMode {
    Kernel = 0,
    User = 1,
}

/// Execution priority (IRQL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PriorityLevel(pub u8);

impl PriorityLevel {
    pub const PASSIVE: PriorityLevel = PriorityLevel(0);
    pub const APC: PriorityLevel = PriorityLevel(1);
    pub const DISPATCH: PriorityLevel = PriorityLevel(2);
    /// Level at which probe reads run; blocks APC delivery and preemption
    /// while the bounded read is in flight.
    pub const PROBE: PriorityLevel = PriorityLevel(15);
}

/// NtGlobalFlag bits.
pub mod global_flags {
    /// FLG_ENABLE_CLOSE_EXCEPTIONS
    pub const ENABLE_CLOSE_EXCEPTIONS: u32 = 0x0040_0000;
}

/// Facts about, and controls over, the current execution context.
pub trait ExecutionContext: Send + Sync {
    /// ExGetPreviousMode()
    fn previous_mode(&self) -> ProcessorMode;

    /// PsGetProcessDebugPort(PsGetCurrentProcess()) != NULL
    fn is_being_debugged(&self) -> bool;

    /// RtlGetNtGlobalFlags()
    fn global_flags(&self) -> u32;

    /// Raise to `level`, returning the previous level.
    fn raise_priority(&self, level: PriorityLevel) -> PriorityLevel;

    /// Restore a level returned by `raise_priority`.
    fn lower_priority(&self, previous: PriorityLevel);

    fn close_exceptions_enabled(&self) -> bool {
        self.global_flags() & global_flags::ENABLE_CLOSE_EXCEPTIONS != 0
    }

    /// Raise with a guard that lowers again on drop.
    fn raised(&self, level: PriorityLevel) -> PriorityGuard<'_, Self>
    where
        Self: Sized,
    {
        let previous = self.raise_priority(level);
        PriorityGuard { ctx: self, previous }
    }
}

impl<T: ExecutionContext + ?Sized> ExecutionContext for std::sync::Arc<T> {
    fn previous_mode(&self) -> ProcessorMode {
        (**self).previous_mode()
    }

    fn is_being_debugged(&self) -> bool {
        (**self).is_being_debugged()
    }

    fn global_flags(&self) -> u32 {
        (**self).global_flags()
    }

    fn raise_priority(&self, level: PriorityLevel) -> PriorityLevel {
        (**self).raise_priority(level)
    }

    fn lower_priority(&self, previous: PriorityLevel) {
        (**self).lower_priority(previous)
    }
}

/// Restores the previous execution priority when dropped, on every exit
/// path of the scope that raised it.
pub struct PriorityGuard<'a, X: ExecutionContext> {
    ctx: &'a X,
    previous: PriorityLevel,
}

impl<'a, X: ExecutionContext> PriorityGuard<'a, X> {
    #[inline]
    pub fn previous(&self) -> PriorityLevel {
        self.previous
    }
}

impl<'a, X: ExecutionContext> Drop for PriorityGuard<'a, X> {
    fn drop(&mut self) {
        self.ctx.lower_priority(self.previous);
    }
}
