//! Handle table services.
//!
//! The engine needs a small slice of the object manager: the auditing
//! query NtClose performs first, reference/dereference by handle, and the
//! close itself.
//!
//! # Implementors
//!
//! - `SimKernel` (veil-module): in-memory handle table with reference
//!   accounting.

use crate::exec::ProcessorMode;
use crate::status::NtStatus;

/// A handle value as passed in an argument register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(pub u64);

impl Handle {
    pub const NULL: Handle = Handle(0);
    /// NtCurrentProcess()
    pub const CURRENT_PROCESS: Handle = Handle(u64::MAX);
    /// NtCurrentThread()
    pub const CURRENT_THREAD: Handle = Handle(u64::MAX - 1);

    #[inline]
    pub const fn is_pseudo(self) -> bool {
        self.0 == Self::CURRENT_PROCESS.0 || self.0 == Self::CURRENT_THREAD.0
    }
}

/// ACCESS_MASK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct AccessMask(pub u32);

impl AccessMask {
    pub const NONE: AccessMask = AccessMask(0);
    pub const THREAD_SET_INFORMATION: AccessMask = AccessMask(0x0020);
    pub const THREAD_QUERY_INFORMATION: AccessMask = AccessMask(0x0040);
    pub const THREAD_ALL_ACCESS: AccessMask = AccessMask(0x001F_FFFF);

    /// True if every bit of `wanted` is granted by `self`.
    #[inline]
    pub const fn grants(self, wanted: AccessMask) -> bool {
        self.0 & wanted.0 == wanted.0
    }
}

/// Object types the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Process,
    Thread,
    File,
    Event,
    Other,
}

/// Handle attribute bits (OBJ_*).
pub mod attributes {
    /// OBJ_PROTECT_CLOSE
    pub const PROTECT_CLOSE: u32 = 0x0000_0001;
    /// OBJ_INHERIT
    pub const INHERIT: u32 = 0x0000_0002;
    /// OBJ_AUDIT_OBJECT_CLOSE
    pub const AUDIT_OBJECT_CLOSE: u32 = 0x0000_0004;
}

/// OBJECT_HANDLE_INFORMATION
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleInfo {
    pub attributes: u32,
    pub granted_access: u32,
}

impl HandleInfo {
    #[inline]
    pub const fn protect_from_close(&self) -> bool {
        self.attributes & attributes::PROTECT_CLOSE != 0
    }
}

/// Opaque referenced object. Must be handed back to `dereference`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub u64);

/// Object-manager operations by handle.
///
/// **Contract:**
/// - Every successful `reference_by_handle` must be matched by exactly one
///   `dereference`. Prefer `reference`, which does that on drop.
/// - `mode` is the caller's previous mode: `User` applies access checks,
///   `Kernel` skips them.
pub trait HandleTable: Send + Sync {
    /// ObQueryObjectAuditingByHandle. `Ok(audit_on_close)` for a live handle.
    fn query_auditing(&self, handle: Handle) -> Result<bool, NtStatus>;

    /// ObReferenceObjectByHandle. `object_type: None` accepts any type.
    fn reference_by_handle(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        object_type: Option<ObjectType>,
        mode: ProcessorMode,
    ) -> Result<(ObjectRef, HandleInfo), NtStatus>;

    /// ObDereferenceObject
    fn dereference(&self, object: ObjectRef);

    /// ObCloseHandle
    fn close_handle(&self, handle: Handle, mode: ProcessorMode) -> NtStatus;

    /// Reference with an RAII guard that dereferences on drop.
    fn reference(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        object_type: Option<ObjectType>,
        mode: ProcessorMode,
    ) -> Result<Referenced<'_, Self>, NtStatus>
    where
        Self: Sized,
    {
        let (object, info) = self.reference_by_handle(handle, desired_access, object_type, mode)?;
        Ok(Referenced {
            table: self,
            object: Some(object),
            info,
        })
    }
}

impl<T: HandleTable + ?Sized> HandleTable for std::sync::Arc<T> {
    fn query_auditing(&self, handle: Handle) -> Result<bool, NtStatus> {
        (**self).query_auditing(handle)
    }

    fn reference_by_handle(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        object_type: Option<ObjectType>,
        mode: ProcessorMode,
    ) -> Result<(ObjectRef, HandleInfo), NtStatus> {
        (**self).reference_by_handle(handle, desired_access, object_type, mode)
    }

    fn dereference(&self, object: ObjectRef) {
        (**self).dereference(object)
    }

    fn close_handle(&self, handle: Handle, mode: ProcessorMode) -> NtStatus {
        (**self).close_handle(handle, mode)
    }
}

/// A live object reference. Dereferenced when dropped.
pub struct Referenced<'a, T: HandleTable> {
    table: &'a T,
    object: Option<ObjectRef>,
    info: HandleInfo,
}

impl<'a, T: HandleTable> Referenced<'a, T> {
    #[inline]
    pub fn info(&self) -> HandleInfo {
        self.info
    }
}

impl<'a, T: HandleTable> Drop for Referenced<'a, T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.table.dereference(object);
        }
    }
}
