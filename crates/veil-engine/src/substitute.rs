//! Substitute implementations run in place of a suppressed service.

use veil_core::exec::{ExecutionContext, PriorityLevel, ProcessorMode};
use veil_core::info_class::thread::HIDE_FROM_DEBUGGER_LEN;
use veil_core::machine::MachineState;
use veil_core::memory::MemoryAccess;
use veil_core::object::{AccessMask, Handle, HandleTable, ObjectType};
use veil_core::status::NtStatus;

/// NtSetInformationThread(ThreadHideFromDebugger) minus the effect.
///
/// Validates exactly what the real service would, so a caller probing
/// with a bad length, buffer or handle still gets the real error. On
/// success the thread is left as it was.
///
/// Arguments: 0 = ThreadHandle, 1 = class, 2 = ThreadInformation,
/// 3 = ThreadInformationLength.
pub fn set_information_thread<H, M, X>(handles: &H, memory: &M, exec: &X, state: &dyn MachineState) -> NtStatus
where
    H: HandleTable,
    M: MemoryAccess,
    X: ExecutionContext,
{
    let handle = Handle(state.read_argument(0));
    let buffer = state.read_argument(2);
    // ULONG
    let length = state.read_argument(3) & 0xFFFF_FFFF;
    let mode = exec.previous_mode();

    if mode == ProcessorMode::User {
        if length != HIDE_FROM_DEBUGGER_LEN {
            return NtStatus::INFO_LENGTH_MISMATCH;
        }
        if length != 0 && !probe_for_read(memory, exec, buffer) {
            return NtStatus::ACCESS_VIOLATION;
        }
    }

    match handles.reference(handle, AccessMask::THREAD_SET_INFORMATION, Some(ObjectType::Thread), mode) {
        Ok(_thread) => NtStatus::SUCCESS,
        Err(status) => status,
    }
}

/// One-byte read of `addr` at probe priority.
fn probe_for_read<M, X>(memory: &M, exec: &X, addr: u64) -> bool
where
    M: MemoryAccess,
    X: ExecutionContext,
{
    let _raised = exec.raised(PriorityLevel::PROBE);
    let mut byte = [0u8; 1];
    memory.read(addr, &mut byte)
}

/// Stand-in for NtClose. The decision was made, and any close performed,
/// during entry; the return phase supplies the status.
pub fn close() -> Option<NtStatus> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::info_class::thread::HIDE_FROM_DEBUGGER;
    use veil_module::{Protection, SimKernel, SimMachine, SimMemory};
    use veil_core::machine::ThreadKey;

    const BUF: u64 = 0x40_000;

    struct Fixture {
        kernel: SimKernel,
        memory: SimMemory,
    }

    impl Fixture {
        fn new() -> Self {
            let memory = SimMemory::new();
            memory.map(BUF, 0x1000, Protection::ReadWrite);
            Self {
                kernel: SimKernel::new(),
                memory,
            }
        }

        fn call(&self, handle: Handle, buffer: u64, length: u64) -> NtStatus {
            let m = SimMachine::new(ThreadKey::new(1), &[handle.0, HIDE_FROM_DEBUGGER, buffer, length]);
            set_information_thread(&self.kernel, &self.memory, &self.kernel, &m)
        }
    }

    #[test]
    fn valid_call_succeeds_without_effect() {
        let f = Fixture::new();
        let t = f.kernel.insert(ObjectType::Thread, AccessMask::THREAD_ALL_ACCESS, 0);
        assert_eq!(f.call(t, BUF, 4), NtStatus::SUCCESS);
        assert!(!f.kernel.is_thread_hidden(t));
        assert_eq!(f.kernel.outstanding_references(), 0);
        assert_eq!(f.kernel.priority(), PriorityLevel::PASSIVE);
        assert_eq!(f.kernel.raise_count(), 1);
    }

    #[test]
    fn pseudo_handle_succeeds() {
        let f = Fixture::new();
        assert_eq!(f.call(Handle::CURRENT_THREAD, BUF, 4), NtStatus::SUCCESS);
    }

    #[test]
    fn wrong_length_is_rejected_before_probe() {
        let f = Fixture::new();
        let t = f.kernel.insert(ObjectType::Thread, AccessMask::THREAD_ALL_ACCESS, 0);
        assert_eq!(f.call(t, BUF, 0), NtStatus::INFO_LENGTH_MISMATCH);
        assert_eq!(f.call(t, BUF, 8), NtStatus::INFO_LENGTH_MISMATCH);
        // High half of the register is not part of a ULONG.
        assert_eq!(f.call(t, BUF, 0xFFFF_FFFF_0000_0004), NtStatus::SUCCESS);
        assert_eq!(f.memory.read_calls(), 1);
    }

    #[test]
    fn unreadable_buffer_is_access_violation() {
        let f = Fixture::new();
        let t = f.kernel.insert(ObjectType::Thread, AccessMask::THREAD_ALL_ACCESS, 0);
        assert_eq!(f.call(t, 0, 4), NtStatus::ACCESS_VIOLATION);
        f.memory.protect(BUF, 1, Protection::NoAccess);
        assert_eq!(f.call(t, BUF, 4), NtStatus::ACCESS_VIOLATION);
        // Priority restored on the failure path too.
        assert_eq!(f.kernel.priority(), PriorityLevel::PASSIVE);
        assert_eq!(f.kernel.raise_count(), 2);
    }

    #[test]
    fn handle_failures_are_returned() {
        let f = Fixture::new();
        let query_only = f.kernel.insert(ObjectType::Thread, AccessMask::THREAD_QUERY_INFORMATION, 0);
        let event = f.kernel.insert(ObjectType::Event, AccessMask(u32::MAX), 0);
        assert_eq!(f.call(Handle(0x7777), BUF, 4), NtStatus::INVALID_HANDLE);
        assert_eq!(f.call(query_only, BUF, 4), NtStatus::ACCESS_DENIED);
        assert_eq!(f.call(event, BUF, 4), NtStatus::OBJECT_TYPE_MISMATCH);
        assert_eq!(f.kernel.outstanding_references(), 0);
    }

    #[test]
    fn kernel_mode_skips_length_and_probe() {
        let f = Fixture::new();
        f.kernel.set_previous_mode(ProcessorMode::Kernel);
        let query_only = f.kernel.insert(ObjectType::Thread, AccessMask::THREAD_QUERY_INFORMATION, 0);
        assert_eq!(f.call(query_only, 0, 0), NtStatus::SUCCESS);
        assert_eq!(f.memory.read_calls(), 0);
        assert_eq!(f.kernel.raise_count(), 0);
    }

    #[test]
    fn close_substitute_leaves_register_alone() {
        assert_eq!(close(), None);
    }
}
