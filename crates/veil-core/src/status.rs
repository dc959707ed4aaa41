//! NTSTATUS values.
//!
//! Only the codes the engine produces or inspects are defined here.

use core::fmt;

/// A 32-bit NTSTATUS.
///
/// In the return register the value is sign-extended to 64 bits, the way a
/// `LONG` return lands in rax. `from_register` only looks at the low half.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NtStatus(pub i32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0);
    pub const INFO_LENGTH_MISMATCH: NtStatus = NtStatus(0xC000_0004_u32 as i32);
    pub const ACCESS_VIOLATION: NtStatus = NtStatus(0xC000_0005_u32 as i32);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008_u32 as i32);
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D_u32 as i32);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022_u32 as i32);
    pub const OBJECT_TYPE_MISMATCH: NtStatus = NtStatus(0xC000_0024_u32 as i32);
    pub const HANDLE_NOT_CLOSABLE: NtStatus = NtStatus(0xC000_0235_u32 as i32);
    pub const PORT_NOT_SET: NtStatus = NtStatus(0xC000_0353_u32 as i32);

    /// NT_SUCCESS(): success and informational codes.
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// Sign-extended register image.
    #[inline]
    pub const fn to_register(self) -> u64 {
        self.0 as i64 as u64
    }

    #[inline]
    pub const fn from_register(raw: u64) -> Self {
        NtStatus(raw as u32 as i32)
    }

    /// Slot image. Same as the register image.
    #[inline]
    pub const fn to_slot(self) -> u64 {
        self.to_register()
    }

    #[inline]
    pub const fn from_slot(raw: u64) -> Self {
        Self::from_register(raw)
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            NtStatus::SUCCESS => "STATUS_SUCCESS",
            NtStatus::INFO_LENGTH_MISMATCH => "STATUS_INFO_LENGTH_MISMATCH",
            NtStatus::ACCESS_VIOLATION => "STATUS_ACCESS_VIOLATION",
            NtStatus::INVALID_HANDLE => "STATUS_INVALID_HANDLE",
            NtStatus::INVALID_PARAMETER => "STATUS_INVALID_PARAMETER",
            NtStatus::ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            NtStatus::OBJECT_TYPE_MISMATCH => "STATUS_OBJECT_TYPE_MISMATCH",
            NtStatus::HANDLE_NOT_CLOSABLE => "STATUS_HANDLE_NOT_CLOSABLE",
            NtStatus::PORT_NOT_SET => "STATUS_PORT_NOT_SET",
            _ => return None,
        })
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({:#010x})", name, self.as_u32()),
            None => write!(f, "NtStatus({:#010x})", self.as_u32()),
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#010x}", self.as_u32()),
        }
    }
}
