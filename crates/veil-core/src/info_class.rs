//! Information classes the engine reacts to.
//!
//! Values are the `PROCESSINFOCLASS` / `THREADINFOCLASS` enumerators of the
//! Windows x64 kernel. Anything not listed passes through untouched.

/// PROCESSINFOCLASS
pub mod process {
    pub const DEBUG_PORT: u64 = 7;
    pub const DEBUG_OBJECT_HANDLE: u64 = 30;
    pub const DEBUG_FLAGS: u64 = 31;
}

/// THREADINFOCLASS
pub mod thread {
    pub const HIDE_FROM_DEBUGGER: u64 = 17;
    pub const WOW64_CONTEXT: u64 = 29;

    /// Information length a user-mode caller must pass when setting
    /// `HIDE_FROM_DEBUGGER` through the substitute.
    pub const HIDE_FROM_DEBUGGER_LEN: u64 = 4;
}
