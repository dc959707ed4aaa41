//! Return dispatcher.
//!
//! Runs after the real service (or substitute) and before the caller sees
//! the result. Takes back what entry parked in slots and falsifies the
//! output. A missing slot means entry never ran for this call instance;
//! the return is then left alone.
//!
//! Query outputs follow the kernel's own write order: data first, then
//! the return length. A caller may alias the two (pass the same pointer
//! for buffer and return length) so that patching the data would clobber
//! the length; the length is therefore read before patching and written
//! back afterwards.

use veil_core::call::CallId;
use veil_core::exec::ExecutionContext;
use veil_core::info_class;
use veil_core::layout::{context, wow64_context, Field};
use veil_core::machine::{MachineState, ThreadKey};
use veil_core::memory::MemoryAccess;
use veil_core::object::HandleTable;
use veil_core::slots::{SlotId, SlotStore};
use veil_core::status::NtStatus;
use veil_module::Patch;

use crate::Plugin;

pub fn on_return<S, M, H, X>(plugin: &Plugin<S, M, H, X>, call: CallId, state: &mut dyn MachineState)
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    let thread = state.thread_key();
    let patch = match call {
        CallId::QueryInformationProcess => query_process(plugin, thread, state),
        CallId::QueryInformationThread => query_thread(plugin, thread),
        CallId::GetContextThread => get_context(plugin, thread),
        CallId::SetInformationThread => None,
        CallId::Close => close(plugin, thread, state),
    };
    if let Some(patch) = patch {
        plugin.trail.record(call, thread, patch);
    }
}

/// Take a slot, insisting it belongs to the call being returned.
#[inline]
fn take<S: SlotStore>(slots: &S, thread: ThreadKey, call: CallId, slot: SlotId) -> Option<u64> {
    debug_assert_eq!(slot.owner(), call, "{:?} taken on return of {:?}", slot, call);
    slots.take(thread, slot)
}

/// Data pointer, length pointer and class for a query, all taken so none
/// outlive this return.
fn take_query<S: SlotStore>(
    slots: &S,
    thread: ThreadKey,
    call: CallId,
    [class, data, len]: [SlotId; 3],
) -> Option<(u64, u64, u64)> {
    let class = take(slots, thread, call, class);
    let data = take(slots, thread, call, data);
    let len = take(slots, thread, call, len);
    match (class, data, len) {
        (Some(class), Some(data), Some(len)) if data != 0 => Some((class, data, len)),
        _ => None,
    }
}

/// Run `patch` between saving and restoring the 32-bit return length.
fn preserving_length<M, T>(memory: &M, len_ptr: u64, patch: impl FnOnce() -> T) -> T
where
    M: MemoryAccess,
{
    let saved = if len_ptr != 0 { memory.read_u32(len_ptr) } else { None };
    let result = patch();
    if let Some(len) = saved {
        memory.write_u32(len_ptr, len);
    }
    result
}

/// Zero each field of the structure at `base`. Returns how many writes
/// landed; each is independent of the others.
fn zero_fields<M: MemoryAccess>(memory: &M, base: u64, fields: &[Field]) -> u8 {
    fields
        .iter()
        .filter(|field| memory.zero(field.at(base), field.width))
        .count() as u8
}

fn query_process<S, M, H, X>(plugin: &Plugin<S, M, H, X>, thread: ThreadKey, state: &mut dyn MachineState) -> Option<Patch>
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    let (class, data, len_ptr) = take_query(
        &plugin.slots,
        thread,
        CallId::QueryInformationProcess,
        [SlotId::ProcessInfoClass, SlotId::ProcessInfoPtr, SlotId::ProcessInfoLenPtr],
    )?;
    let memory = &plugin.memory;

    preserving_length(memory, len_ptr, || match class {
        info_class::process::DEBUG_PORT => Some(Patch::DebugPort {
            ok: memory.write_u64(data, 0),
        }),
        info_class::process::DEBUG_FLAGS => Some(Patch::DebugFlags {
            ok: memory.write_u32(data, 1),
        }),
        info_class::process::DEBUG_OBJECT_HANDLE
            if state.read_return_value() == NtStatus::SUCCESS.to_register() =>
        {
            let ok = memory.write_u64(data, 0);
            state.write_return_value(NtStatus::PORT_NOT_SET.to_register());
            Some(Patch::DebugObjectHandle { ok })
        }
        _ => None,
    })
}

fn query_thread<S, M, H, X>(plugin: &Plugin<S, M, H, X>, thread: ThreadKey) -> Option<Patch>
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    let (class, data, len_ptr) = take_query(
        &plugin.slots,
        thread,
        CallId::QueryInformationThread,
        [SlotId::ThreadInfoClass, SlotId::ThreadInfoPtr, SlotId::ThreadInfoLenPtr],
    )?;
    let memory = &plugin.memory;

    preserving_length(memory, len_ptr, || match class {
        info_class::thread::WOW64_CONTEXT => Some(Patch::Wow64DebugRegisters {
            zeroed: zero_fields(memory, data, &wow64_context::DEBUG_REGISTERS),
        }),
        info_class::thread::HIDE_FROM_DEBUGGER => Some(Patch::HideFromDebuggerQuery {
            ok: memory.write_u8(data, 1),
        }),
        _ => None,
    })
}

fn get_context<S, M, H, X>(plugin: &Plugin<S, M, H, X>, thread: ThreadKey) -> Option<Patch>
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    let ctx = take(&plugin.slots, thread, CallId::GetContextThread, SlotId::ContextThreadPtr)?;
    if ctx == 0 {
        return None;
    }
    let zeroed = zero_fields(&plugin.memory, ctx, &context::DEBUG_REGISTERS)
        + zero_fields(&plugin.memory, ctx, &context::BRANCH_TRACE);
    Some(Patch::ContextDebugRegisters { zeroed })
}

fn close<S, M, H, X>(plugin: &Plugin<S, M, H, X>, thread: ThreadKey, state: &mut dyn MachineState) -> Option<Patch>
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    let status = take(&plugin.slots, thread, CallId::Close, SlotId::CloseReturnValue);
    let overwrite = take(&plugin.slots, thread, CallId::Close, SlotId::CloseOverwriteFlag);
    match (status, overwrite) {
        (Some(status), Some(flag)) if flag != 0 => {
            let status = NtStatus::from_slot(status);
            state.write_return_value(status.to_register());
            Some(Patch::CloseStatus(status))
        }
        _ => None,
    }
}
