//! `SimKernel`: in-memory `HandleTable` and `ExecutionContext`.
//!
//! Models the slice of the object manager and executive the engine calls
//! into: a handle table with per-handle attributes and granted access,
//! object reference counts, a close log, the caller's previous mode,
//! debug-port presence, global flags and the current execution priority.
//!
//! Handle values are multiples of 4 starting at 4, like a real handle
//! table. `Handle::CURRENT_PROCESS` and `Handle::CURRENT_THREAD` resolve
//! to a process and a thread object created with the kernel.

use veil_core::exec::{ExecutionContext, PriorityLevel, ProcessorMode};
use veil_core::object::{AccessMask, Handle, HandleInfo, HandleTable, ObjectRef, ObjectType};
use veil_core::spinlock::SpinLock;
use veil_core::status::NtStatus;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    object: u64,
    attributes: u32,
    granted: AccessMask,
}

#[derive(Debug)]
struct Object {
    ty: ObjectType,
    refs: usize,
    hidden_from_debugger: bool,
}

struct State {
    handles: HashMap<u64, HandleEntry>,
    objects: HashMap<u64, Object>,
    next_handle: u64,
    next_object: u64,
    closed: Vec<Handle>,
}

impl State {
    fn new_object(&mut self, ty: ObjectType) -> u64 {
        self.next_object += 1;
        let id = self.next_object;
        self.objects.insert(
            id,
            Object {
                ty,
                refs: 0,
                hidden_from_debugger: false,
            },
        );
        id
    }

    fn resolve(&self, handle: Handle) -> Option<HandleEntry> {
        match handle {
            Handle::CURRENT_PROCESS => Some(HandleEntry {
                object: CURRENT_PROCESS_OBJECT,
                attributes: 0,
                granted: AccessMask(u32::MAX),
            }),
            Handle::CURRENT_THREAD => Some(HandleEntry {
                object: CURRENT_THREAD_OBJECT,
                attributes: 0,
                granted: AccessMask::THREAD_ALL_ACCESS,
            }),
            _ => self.handles.get(&handle.0).copied(),
        }
    }
}

const CURRENT_PROCESS_OBJECT: u64 = 1;
const CURRENT_THREAD_OBJECT: u64 = 2;

pub struct SimKernel {
    state: SpinLock<State>,
    debug_port: AtomicBool,
    global_flags: AtomicU32,
    previous_mode: AtomicU8,
    priority: AtomicU8,
    raises: AtomicUsize,
    close_calls: AtomicUsize,
}

impl SimKernel {
    /// A kernel whose caller is in user mode, not debugged, no global flags.
    pub fn new() -> Self {
        let mut state = State {
            handles: HashMap::new(),
            objects: HashMap::new(),
            next_handle: 0,
            next_object: 0,
            closed: Vec::new(),
        };
        let process = state.new_object(ObjectType::Process);
        let thread = state.new_object(ObjectType::Thread);
        debug_assert_eq!((process, thread), (CURRENT_PROCESS_OBJECT, CURRENT_THREAD_OBJECT));

        Self {
            state: SpinLock::new(state),
            debug_port: AtomicBool::new(false),
            global_flags: AtomicU32::new(0),
            previous_mode: AtomicU8::new(ProcessorMode::User as u8),
            priority: AtomicU8::new(PriorityLevel::PASSIVE.0),
            raises: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Create an object of type `ty` and open a handle to it.
    pub fn insert(&self, ty: ObjectType, access: AccessMask, attributes: u32) -> Handle {
        let mut state = self.state.lock();
        let object = state.new_object(ty);
        state.next_handle += 4;
        let handle = state.next_handle;
        state.handles.insert(
            handle,
            HandleEntry {
                object,
                attributes,
                granted: access,
            },
        );
        Handle(handle)
    }

    pub fn set_debug_port(&self, present: bool) {
        self.debug_port.store(present, Ordering::Relaxed);
    }

    pub fn set_global_flags(&self, flags: u32) {
        self.global_flags.store(flags, Ordering::Relaxed);
    }

    pub fn set_previous_mode(&self, mode: ProcessorMode) {
        self.previous_mode.store(mode as u8, Ordering::Relaxed);
    }

    /// Replace the attribute bits of an open handle.
    pub fn set_attributes(&self, handle: Handle, attributes: u32) -> bool {
        match self.state.lock().handles.get_mut(&handle.0) {
            Some(entry) => {
                entry.attributes = attributes;
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, handle: Handle) -> bool {
        self.state.lock().handles.contains_key(&handle.0)
    }

    /// Handles successfully closed so far, in order.
    pub fn closed(&self) -> Vec<Handle> {
        self.state.lock().closed.clone()
    }

    /// `close_handle` calls so far, successful or not.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }

    /// References taken and not yet dereferenced, across all objects.
    pub fn outstanding_references(&self) -> usize {
        self.state.lock().objects.values().map(|o| o.refs).sum()
    }

    pub fn priority(&self) -> PriorityLevel {
        PriorityLevel(self.priority.load(Ordering::Relaxed))
    }

    /// Number of `raise_priority` calls so far.
    pub fn raise_count(&self) -> usize {
        self.raises.load(Ordering::Relaxed)
    }

    /// What the real NtSetInformationThread(ThreadHideFromDebugger) does to
    /// the target thread.
    pub fn hide_thread(&self, handle: Handle) -> NtStatus {
        let mut state = self.state.lock();
        let Some(entry) = state.resolve(handle) else {
            return NtStatus::INVALID_HANDLE;
        };
        match state.objects.get_mut(&entry.object) {
            Some(object) if object.ty == ObjectType::Thread => {
                object.hidden_from_debugger = true;
                NtStatus::SUCCESS
            }
            Some(_) => NtStatus::OBJECT_TYPE_MISMATCH,
            None => NtStatus::INVALID_HANDLE,
        }
    }

    pub fn is_thread_hidden(&self, handle: Handle) -> bool {
        let state = self.state.lock();
        state
            .resolve(handle)
            .and_then(|entry| state.objects.get(&entry.object))
            .is_some_and(|object| object.hidden_from_debugger)
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable for SimKernel {
    fn query_auditing(&self, handle: Handle) -> Result<bool, NtStatus> {
        if handle.is_pseudo() {
            return Err(NtStatus::INVALID_HANDLE);
        }
        let state = self.state.lock();
        let entry = state.handles.get(&handle.0).ok_or(NtStatus::INVALID_HANDLE)?;
        Ok(entry.attributes & veil_core::object::attributes::AUDIT_OBJECT_CLOSE != 0)
    }

    fn reference_by_handle(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        object_type: Option<ObjectType>,
        mode: ProcessorMode,
    ) -> Result<(ObjectRef, HandleInfo), NtStatus> {
        let mut state = self.state.lock();
        let entry = state.resolve(handle).ok_or(NtStatus::INVALID_HANDLE)?;
        let object = state
            .objects
            .get_mut(&entry.object)
            .ok_or(NtStatus::INVALID_HANDLE)?;

        if object_type.is_some_and(|ty| ty != object.ty) {
            return Err(NtStatus::OBJECT_TYPE_MISMATCH);
        }
        if mode == ProcessorMode::User && !entry.granted.grants(desired_access) {
            return Err(NtStatus::ACCESS_DENIED);
        }

        object.refs += 1;
        let info = HandleInfo {
            attributes: entry.attributes,
            granted_access: entry.granted.0,
        };
        Ok((ObjectRef(entry.object), info))
    }

    fn dereference(&self, object: ObjectRef) {
        let mut state = self.state.lock();
        if let Some(obj) = state.objects.get_mut(&object.0) {
            debug_assert!(obj.refs > 0, "dereference without reference");
            obj.refs = obj.refs.saturating_sub(1);
        }
    }

    fn close_handle(&self, handle: Handle, _mode: ProcessorMode) -> NtStatus {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let Some(entry) = state.handles.get(&handle.0).copied() else {
            return NtStatus::INVALID_HANDLE;
        };
        if entry.attributes & veil_core::object::attributes::PROTECT_CLOSE != 0 {
            return NtStatus::HANDLE_NOT_CLOSABLE;
        }
        state.handles.remove(&handle.0);
        state.closed.push(handle);
        NtStatus::SUCCESS
    }
}

impl ExecutionContext for SimKernel {
    fn previous_mode(&self) -> ProcessorMode {
        match self.previous_mode.load(Ordering::Relaxed) {
            0 => ProcessorMode::Kernel,
            _ => ProcessorMode::User,
        }
    }

    fn is_being_debugged(&self) -> bool {
        self.debug_port.load(Ordering::Relaxed)
    }

    fn global_flags(&self) -> u32 {
        self.global_flags.load(Ordering::Relaxed)
    }

    fn raise_priority(&self, level: PriorityLevel) -> PriorityLevel {
        self.raises.fetch_add(1, Ordering::Relaxed);
        let previous = self.priority.load(Ordering::Relaxed);
        debug_assert!(level.0 >= previous, "raise to a lower level");
        self.priority.store(level.0, Ordering::Relaxed);
        PriorityLevel(previous)
    }

    fn lower_priority(&self, previous: PriorityLevel) {
        self.priority.store(previous.0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::object::attributes;

    #[test]
    fn handles_are_multiples_of_four() {
        let k = SimKernel::new();
        let a = k.insert(ObjectType::Event, AccessMask::NONE, 0);
        let b = k.insert(ObjectType::File, AccessMask::NONE, 0);
        assert_eq!(a, Handle(4));
        assert_eq!(b, Handle(8));
    }

    #[test]
    fn reference_checks_type_and_access() {
        let k = SimKernel::new();
        let t = k.insert(ObjectType::Thread, AccessMask::THREAD_QUERY_INFORMATION, 0);
        let e = k.insert(ObjectType::Event, AccessMask(u32::MAX), 0);

        let err = k
            .reference_by_handle(t, AccessMask::THREAD_SET_INFORMATION, Some(ObjectType::Thread), ProcessorMode::User)
            .unwrap_err();
        assert_eq!(err, NtStatus::ACCESS_DENIED);

        let err = k
            .reference_by_handle(e, AccessMask::NONE, Some(ObjectType::Thread), ProcessorMode::User)
            .unwrap_err();
        assert_eq!(err, NtStatus::OBJECT_TYPE_MISMATCH);

        // Kernel mode skips the access check.
        let (obj, _) = k
            .reference_by_handle(t, AccessMask::THREAD_SET_INFORMATION, Some(ObjectType::Thread), ProcessorMode::Kernel)
            .unwrap();
        assert_eq!(k.outstanding_references(), 1);
        k.dereference(obj);
        assert_eq!(k.outstanding_references(), 0);
    }

    #[test]
    fn referenced_guard_releases() {
        let k = SimKernel::new();
        let h = k.insert(ObjectType::File, AccessMask::NONE, attributes::PROTECT_CLOSE);
        {
            let r = k.reference(h, AccessMask::NONE, None, ProcessorMode::User).unwrap();
            assert!(r.info().protect_from_close());
            assert_eq!(k.outstanding_references(), 1);
        }
        assert_eq!(k.outstanding_references(), 0);
    }

    #[test]
    fn pseudo_thread_handle_references_current_thread() {
        let k = SimKernel::new();
        let r = k
            .reference(Handle::CURRENT_THREAD, AccessMask::THREAD_SET_INFORMATION, Some(ObjectType::Thread), ProcessorMode::User)
            .unwrap();
        drop(r);
        assert_eq!(k.query_auditing(Handle::CURRENT_THREAD), Err(NtStatus::INVALID_HANDLE));
    }

    #[test]
    fn close_semantics() {
        let k = SimKernel::new();
        let open = k.insert(ObjectType::Event, AccessMask::NONE, attributes::AUDIT_OBJECT_CLOSE);
        let protected = k.insert(ObjectType::Event, AccessMask::NONE, attributes::PROTECT_CLOSE);

        assert_eq!(k.query_auditing(open), Ok(true));
        assert_eq!(k.query_auditing(protected), Ok(false));

        assert_eq!(k.close_handle(protected, ProcessorMode::User), NtStatus::HANDLE_NOT_CLOSABLE);
        assert!(k.is_open(protected));

        assert_eq!(k.close_handle(open, ProcessorMode::User), NtStatus::SUCCESS);
        assert!(!k.is_open(open));
        assert_eq!(k.close_handle(open, ProcessorMode::User), NtStatus::INVALID_HANDLE);
        assert_eq!(k.query_auditing(open), Err(NtStatus::INVALID_HANDLE));

        assert_eq!(k.closed(), vec![open]);
        assert_eq!(k.close_calls(), 3);
    }

    #[test]
    fn priority_guard_round_trip() {
        let k = SimKernel::new();
        {
            let _g = k.raised(PriorityLevel::PROBE);
            assert_eq!(k.priority(), PriorityLevel::PROBE);
        }
        assert_eq!(k.priority(), PriorityLevel::PASSIVE);
        assert_eq!(k.raise_count(), 1);
    }

    #[test]
    fn hide_thread_marks_the_thread() {
        let k = SimKernel::new();
        let t = k.insert(ObjectType::Thread, AccessMask::THREAD_ALL_ACCESS, 0);
        assert!(!k.is_thread_hidden(t));
        assert_eq!(k.hide_thread(t), NtStatus::SUCCESS);
        assert!(k.is_thread_hidden(t));
        assert!(!k.is_thread_hidden(Handle::CURRENT_THREAD));
    }

    #[test]
    fn execution_context_setters() {
        let k = SimKernel::new();
        assert_eq!(k.previous_mode(), ProcessorMode::User);
        assert!(!k.is_being_debugged());
        k.set_previous_mode(ProcessorMode::Kernel);
        k.set_debug_port(true);
        k.set_global_flags(veil_core::exec::global_flags::ENABLE_CLOSE_EXCEPTIONS);
        assert_eq!(k.previous_mode(), ProcessorMode::Kernel);
        assert!(k.is_being_debugged());
        assert!(k.close_exceptions_enabled());
    }
}
