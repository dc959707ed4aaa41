//! Intercepted call identifiers and the interception contract.
//!
//! A `CallId` names which intercepted service is in play for one
//! entry/return pair. Its raw value is the probe id handed to the host at
//! registration time and echoed back on every callback.
//!
//! # Implementors of `Interceptor`
//!
//! - `Plugin` (veil-engine): the anti-debug decision engine.

use crate::machine::{CallerInfo, MachineState};
use crate::status::NtStatus;

/// Intercepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CallId {
    /// NtQueryInformationProcess
    QueryInformationProcess = 0,
    /// NtQueryInformationThread
    QueryInformationThread = 1,
    /// NtGetContextThread
    GetContextThread = 2,
    /// NtSetInformationThread
    SetInformationThread = 3,
    /// NtClose
    Close = 4,
}

impl CallId {
    /// Every call identifier, in probe-id order.
    pub const ALL: [CallId; 5] = [
        CallId::QueryInformationProcess,
        CallId::QueryInformationThread,
        CallId::GetContextThread,
        CallId::SetInformationThread,
        CallId::Close,
    ];

    /// Decode a raw probe id. Unknown ids yield `None` and are ignored by
    /// the dispatchers.
    #[inline]
    pub const fn from_raw(raw: u32) -> Option<CallId> {
        match raw {
            0 => Some(CallId::QueryInformationProcess),
            1 => Some(CallId::QueryInformationThread),
            2 => Some(CallId::GetContextThread),
            3 => Some(CallId::SetInformationThread),
            4 => Some(CallId::Close),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Service name used when registering with the host (without the
    /// `Nt`/`Zw` prefix).
    pub const fn service_name(self) -> &'static str {
        match self {
            CallId::QueryInformationProcess => "QueryInformationProcess",
            CallId::QueryInformationThread => "QueryInformationThread",
            CallId::GetContextThread => "GetContextThread",
            CallId::SetInformationThread => "SetInformationThread",
            CallId::Close => "Close",
        }
    }

    /// Reverse of `service_name`.
    pub fn from_service_name(name: &str) -> Option<CallId> {
        CallId::ALL.into_iter().find(|id| id.service_name() == name)
    }
}

/// Replacement routine run instead of the intercepted service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitute {
    /// Validates like NtSetInformationThread(ThreadHideFromDebugger) but
    /// leaves the thread untouched.
    SetInformationThread,
    /// Does nothing; the return phase supplies the status.
    Close,
}

/// Entry-phase verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Let the real service run.
    Continue,
    /// Run the substitute for the remainder of the call.
    Redirect(Substitute),
}

/// Callbacks the interception host delivers around each intercepted call.
///
/// **Contract:**
/// - `on_entry` and `on_return` for one call instance happen on the same
///   logical thread, entry first. Nothing else is ordered.
/// - Neither callback may block or fail. Problems are resolved into status
///   values seen by the original caller.
pub trait Interceptor: Send + Sync {
    /// Whether callbacks for `caller`'s process should reach this
    /// interceptor at all. Hosts evaluate it once per process.
    fn is_target(&self, caller: &CallerInfo) -> bool;

    /// Entry phase. Returns whether the real service should run.
    fn on_entry(&self, call: CallId, state: &mut dyn MachineState, caller: &CallerInfo) -> Action;

    /// Return phase. May rewrite caller memory and the return value.
    fn on_return(&self, call: CallId, state: &mut dyn MachineState, caller: &CallerInfo);

    /// Execute a substitute chosen by `on_entry`.
    ///
    /// `Some(status)` becomes the call's return value; `None` leaves the
    /// return register as it is.
    fn run_substitute(&self, substitute: Substitute, state: &mut dyn MachineState) -> Option<NtStatus>;
}
