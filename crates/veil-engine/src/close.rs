//! Handle-close decision.
//!
//! Under a debugger, or with FLG_ENABLE_CLOSE_EXCEPTIONS set, closing an
//! invalid or protected handle from user mode raises an exception the
//! debugger sees first. That exception is a classic debugger check. The
//! entry phase therefore decides what NtClose would report, performs the
//! close itself when it is safe, and suppresses the real service. The
//! return phase then writes the decided status into the return register.
//!
//! Classification never changes handle state, so asking twice about the
//! same handle gives the same answer.

use veil_core::exec::ExecutionContext;
use veil_core::object::{AccessMask, Handle, HandleTable};
use veil_core::status::NtStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseVerdict {
    /// Not a live handle. Report STATUS_INVALID_HANDLE, close nothing.
    Invalid,
    /// Marked protect-from-close while close exceptions are armed. Report
    /// STATUS_HANDLE_NOT_CLOSABLE, close nothing.
    NotClosable,
    /// Close for real; the caller gets the real status.
    Close,
}

/// Classify a close of `handle` without touching it.
pub fn classify_close<H, X>(handles: &H, exec: &X, handle: Handle) -> CloseVerdict
where
    H: HandleTable,
    X: ExecutionContext,
{
    if handles.query_auditing(handle) == Err(NtStatus::INVALID_HANDLE) {
        return CloseVerdict::Invalid;
    }

    let armed = exec.is_being_debugged() || exec.close_exceptions_enabled();
    if !armed {
        return CloseVerdict::Close;
    }

    match handles.reference(handle, AccessMask::NONE, None, exec.previous_mode()) {
        Ok(object) if object.info().protect_from_close() => CloseVerdict::NotClosable,
        _ => CloseVerdict::Close,
    }
}

/// Classify, then act: close the handle now if the verdict allows it.
/// Returns the status the caller of NtClose must see.
pub fn decide_and_close<H, X>(handles: &H, exec: &X, handle: Handle) -> NtStatus
where
    H: HandleTable,
    X: ExecutionContext,
{
    match classify_close(handles, exec, handle) {
        CloseVerdict::Invalid => NtStatus::INVALID_HANDLE,
        CloseVerdict::NotClosable => NtStatus::HANDLE_NOT_CLOSABLE,
        CloseVerdict::Close => handles.close_handle(handle, exec.previous_mode()),
    }
}
