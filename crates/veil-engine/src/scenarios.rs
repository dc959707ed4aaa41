//! End-to-end scenarios through `SimHost`: target check, entry, real
//! service or substitute, return.

use crate::{Plugin, PluginConfig, SimPlugin};

use veil_core::call::{Action, CallId, Substitute};
use veil_core::info_class::{process, thread};
use veil_core::machine::{CallerInfo, MachineState};
use veil_core::object::{attributes, AccessMask, Handle, ObjectType};
use veil_core::status::NtStatus;
use veil_module::{CallTable, KeyedSlots, Patch, Protection, SimHost, SimKernel, SimMachine, SimMemory};

use std::sync::Arc;

const DATA: u64 = 0x7FF0_0000;
const LEN: u64 = 0x7FF0_0F00;

fn target(tid: u32) -> CallerInfo {
    CallerInfo::new("al-khaser.exe", 0x1F00, tid)
}

fn plugin() -> SimPlugin {
    let p = SimPlugin::simulated(PluginConfig::default());
    p.memory.map(DATA, 0x2000, Protection::ReadWrite);
    p
}

fn host(p: &SimPlugin) -> SimHost<'_, SimPlugin> {
    let mut host = SimHost::new(p, CallTable::nt_services());
    p.initialize(host.table_mut()).unwrap();
    host
}

/// Real NtQueryInformationProcess/Thread: write `value` to the buffer and
/// `len` to the return length at `LEN`.
fn real_query<'a>(mem: &'a SimMemory, value: &'a [u8], len: u32) -> impl FnOnce(&[u64]) -> NtStatus + 'a {
    move |args: &[u64]| {
        mem.poke(args[2], value);
        mem.poke(LEN, &len.to_le_bytes());
        NtStatus::SUCCESS
    }
}

// ── Scenario A ──

#[test]
fn scenario_a_debug_port_reads_zero_length_kept() {
    let p = plugin();
    let host = host(&p);
    let out = host.syscall(
        &target(1),
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_PORT, DATA, 8, LEN],
        real_query(&p.memory, &u64::MAX.to_le_bytes(), 8),
    );
    assert!(out.real_ran && !out.redirected);
    assert_eq!(out.status, NtStatus::SUCCESS);
    assert_eq!(p.memory.peek_u64(DATA), Some(0));
    assert_eq!(p.memory.peek_u32(LEN), Some(8));

    let events = p.trail.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].patch, Patch::DebugPort { ok: true });
    assert_eq!(events[0].thread, target(1).thread_key());
}

#[test]
fn debug_object_handle_hidden() {
    let p = plugin();
    let host = host(&p);
    let out = host.syscall(
        &target(1),
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_OBJECT_HANDLE, DATA, 8, LEN],
        real_query(&p.memory, &0x3Cu64.to_le_bytes(), 8),
    );
    assert_eq!(out.status, NtStatus::PORT_NOT_SET);
    assert_eq!(p.memory.peek_u64(DATA), Some(0));
    assert_eq!(p.memory.peek_u32(LEN), Some(8));
}

// ── Scenario B ──

#[test]
fn scenario_b_close_of_invalid_handle() {
    let p = plugin();
    p.exec.set_debug_port(true);
    let host = host(&p);
    let out = host.syscall(&target(1), "Close", &[0xDEAD_BEE0], |_| panic!("real NtClose ran"));
    assert!(out.redirected);
    assert!(!out.real_ran);
    assert_eq!(out.status, NtStatus::INVALID_HANDLE);
    assert_eq!(p.handles.close_calls(), 0);
}

#[test]
fn close_of_protected_handle_under_debugger() {
    let p = plugin();
    p.exec.set_debug_port(true);
    let h = p.handles.insert(ObjectType::File, AccessMask::NONE, attributes::PROTECT_CLOSE);
    let host = host(&p);
    let out = host.syscall(&target(1), "Close", &[h.0], |_| panic!("real NtClose ran"));
    assert_eq!(out.status, NtStatus::HANDLE_NOT_CLOSABLE);
    assert!(p.handles.is_open(h));
    assert_eq!(p.handles.outstanding_references(), 0);
}

#[test]
fn close_of_good_handle_really_closes() {
    let p = plugin();
    let h = p.handles.insert(ObjectType::Event, AccessMask::NONE, 0);
    let host = host(&p);
    let out = host.syscall(&target(1), "Close", &[h.0], |_| panic!("real NtClose ran"));
    assert_eq!(out.status, NtStatus::SUCCESS);
    assert!(out.redirected);
    assert_eq!(p.handles.closed(), vec![h]);
    assert_eq!(
        p.trail.pop().map(|e| e.patch),
        Some(Patch::CloseStatus(NtStatus::SUCCESS))
    );
}

// ── Scenario C ──

#[test]
fn scenario_c_hide_from_debugger_set_then_query() {
    let p = plugin();
    let t = p.handles.insert(ObjectType::Thread, AccessMask::THREAD_ALL_ACCESS, 0);
    let host = host(&p);

    let out = host.syscall(
        &target(1),
        "SetInformationThread",
        &[t.0, thread::HIDE_FROM_DEBUGGER, DATA, 4],
        |_| panic!("real NtSetInformationThread ran"),
    );
    assert!(out.redirected);
    assert_eq!(out.status, NtStatus::SUCCESS);
    assert!(!p.handles.is_thread_hidden(t));

    // The real query reports the truth: not hidden.
    let kernel = Arc::clone(&p.handles);
    let mem = &p.memory;
    let out = host.syscall(
        &target(1),
        "QueryInformationThread",
        &[t.0, thread::HIDE_FROM_DEBUGGER, DATA + 0x100, 0, 0],
        move |args| {
            let hidden = kernel.is_thread_hidden(Handle(args[0]));
            mem.poke(args[2], &[hidden as u8]);
            NtStatus::SUCCESS
        },
    );
    assert_eq!(out.status, NtStatus::SUCCESS);
    assert_eq!(p.memory.peek(DATA + 0x100, 1), Some(vec![1]));

    let patches: Vec<_> = p.trail.drain().into_iter().map(|e| e.patch).collect();
    assert_eq!(
        patches,
        vec![
            Patch::HideFromDebuggerSet(NtStatus::SUCCESS),
            Patch::HideFromDebuggerQuery { ok: true },
        ]
    );
}

#[test]
fn hide_from_debugger_set_with_bad_length_fails_like_the_real_call() {
    let p = plugin();
    let host = host(&p);
    let out = host.syscall(
        &target(1),
        "SetInformationThread",
        &[Handle::CURRENT_THREAD.0, thread::HIDE_FROM_DEBUGGER, 0, 0],
        |_| panic!("real NtSetInformationThread ran"),
    );
    assert_eq!(out.status, NtStatus::INFO_LENGTH_MISMATCH);
}

#[test]
fn other_thread_classes_run_for_real() {
    let p = plugin();
    let host = host(&p);
    let out = host.syscall(
        &target(1),
        "SetInformationThread",
        &[Handle::CURRENT_THREAD.0, 0x1D, 0, 0],
        |_| NtStatus::INVALID_PARAMETER,
    );
    assert!(out.real_ran);
    assert_eq!(out.status, NtStatus::INVALID_PARAMETER);
}

// ── Properties ──

#[test]
fn null_data_pointer_means_no_writes() {
    let p = plugin();
    let host = host(&p);
    let c = target(2);
    host.syscall(&c, "QueryInformationProcess", &[0, process::DEBUG_PORT, 0, 8, LEN], |_| NtStatus::SUCCESS);
    host.syscall(&c, "QueryInformationProcess", &[0, process::DEBUG_FLAGS, 0, 4, 0], |_| NtStatus::SUCCESS);
    host.syscall(&c, "QueryInformationThread", &[0, thread::WOW64_CONTEXT, 0, LEN, 0], |_| NtStatus::SUCCESS);
    host.syscall(&c, "QueryInformationThread", &[0, thread::HIDE_FROM_DEBUGGER, 0, 0, 0], |_| NtStatus::SUCCESS);
    host.syscall(&c, "GetContextThread", &[0, 0], |_| NtStatus::SUCCESS);
    assert_eq!(p.memory.write_calls(), 0);
    assert!(p.trail.is_empty());
}

#[test]
fn length_after_return_matches_real_call() {
    let cases: [(&str, u64, u64); 5] = [
        ("QueryInformationProcess", process::DEBUG_PORT, 8),
        ("QueryInformationProcess", process::DEBUG_FLAGS, 4),
        ("QueryInformationProcess", process::DEBUG_OBJECT_HANDLE, 8),
        ("QueryInformationProcess", 0, 48),
        ("QueryInformationThread", thread::HIDE_FROM_DEBUGGER, 1),
    ];
    for (name, class, len) in cases {
        let p = plugin();
        let host = host(&p);
        // Position 4 for processes, 3 for threads.
        let args = if name == "QueryInformationProcess" {
            vec![0, class, DATA, len, LEN]
        } else {
            vec![0, class, DATA, LEN, 0]
        };
        host.syscall(&target(3), name, &args, real_query(&p.memory, &[0x5A; 8], len as u32));
        assert_eq!(p.memory.peek_u32(LEN), Some(len as u32), "{} class {}", name, class);
    }
}

#[test]
fn non_target_process_is_untouched() {
    let p = plugin();
    p.exec.set_debug_port(true);
    let host = host(&p);
    let other = CallerInfo::new("x64dbg.exe", 0x44, 1);
    host.syscall(
        &other,
        "QueryInformationProcess",
        &[0, process::DEBUG_PORT, DATA, 8, LEN],
        real_query(&p.memory, &u64::MAX.to_le_bytes(), 8),
    );
    assert_eq!(p.memory.peek_u64(DATA), Some(u64::MAX));

    let out = host.syscall(&other, "Close", &[0x1234], |_| NtStatus::INVALID_HANDLE);
    assert!(out.real_ran);
    assert_eq!(p.memory.write_calls(), 0);
}

#[test]
fn deinitialized_plugin_sees_nothing() {
    let p = plugin();
    let mut host = host(&p);
    p.deinitialize(host.table_mut()).unwrap();
    let out = host.syscall(
        &target(1),
        "QueryInformationProcess",
        &[0, process::DEBUG_PORT, DATA, 8, 0],
        real_query(&p.memory, &7u64.to_le_bytes(), 8),
    );
    assert!(out.real_ran);
    assert_eq!(p.memory.peek_u64(DATA), Some(7));
}

#[test]
fn unknown_probe_ids_are_ignored() {
    let p = plugin();
    let mut m = SimMachine::new(target(1).thread_key(), &[0, process::DEBUG_PORT, DATA, 8, 0]);
    assert_eq!(p.on_entry_raw(99, &mut m, &target(1)), Action::Continue);
    m.write_return_value(0x55);
    p.on_return_raw(99, &mut m, &target(1));
    assert_eq!(m.read_return_value(), 0x55);
    assert_eq!(p.memory.write_calls(), 0);

    assert_eq!(
        p.on_entry_raw(CallId::Close.as_raw(), &mut m, &target(1)),
        Action::Redirect(Substitute::Close)
    );
}

// ── Interleaving ──

#[test]
fn interleaved_threads_keep_their_own_slots() {
    let p = plugin();
    let host = host(&p);
    let (a, b) = (target(10), target(11));

    // Two logical threads on one OS thread, phases interleaved.
    let pa = host.enter(&a, "QueryInformationProcess", &[0, process::DEBUG_FLAGS, DATA, 4, 0]);
    let pb = host.enter(&b, "QueryInformationProcess", &[0, process::DEBUG_PORT, DATA + 0x100, 8, 0]);

    p.memory.poke(DATA + 0x100, &u64::MAX.to_le_bytes());
    host.complete(pb, |_| NtStatus::SUCCESS);
    p.memory.poke(DATA, &0u32.to_le_bytes());
    host.complete(pa, |_| NtStatus::SUCCESS);

    assert_eq!(p.memory.peek_u32(DATA), Some(1));
    assert_eq!(p.memory.peek_u64(DATA + 0x100), Some(0));
}

#[test]
fn same_call_on_two_logical_threads_completes_out_of_order() {
    let p = plugin();
    let host = host(&p);
    let (a, b) = (target(20), target(21));

    let pa = host.enter(&a, "QueryInformationProcess", &[0, process::DEBUG_PORT, DATA, 8, 0]);
    let pb = host.enter(&b, "QueryInformationProcess", &[0, process::DEBUG_PORT, DATA + 0x100, 8, 0]);
    assert_eq!(p.slots.threads_in_flight(), 2);

    host.complete(pb, |args| {
        p.memory.poke(args[2], &u64::MAX.to_le_bytes());
        NtStatus::SUCCESS
    });
    host.complete(pa, |args| {
        p.memory.poke(args[2], &u64::MAX.to_le_bytes());
        NtStatus::SUCCESS
    });

    assert_eq!(p.memory.peek_u64(DATA), Some(0));
    assert_eq!(p.memory.peek_u64(DATA + 0x100), Some(0));
    assert_eq!(p.slots.threads_in_flight(), 0);
    assert_eq!(p.trail.len(), 2);
}

#[test]
fn other_calls_between_entry_and_return() {
    let p = plugin();
    let host = host(&p);
    let c = target(12);
    let h = p.handles.insert(ObjectType::Event, AccessMask::NONE, 0);

    let pending = host.enter(&c, "GetContextThread", &[Handle::CURRENT_THREAD.0, DATA]);
    // A nested close on the same thread touches only its own slots.
    let out = host.syscall(&c, "Close", &[h.0], |_| panic!("real NtClose ran"));
    assert_eq!(out.status, NtStatus::SUCCESS);

    p.memory.poke(DATA + 0x48, &[0xFF; 0x30]);
    host.complete(pending, |_| NtStatus::SUCCESS);
    assert_eq!(p.memory.peek(DATA + 0x48, 0x30), Some(vec![0; 0x30]));
}

#[test]
fn concurrent_os_threads_with_keyed_slots() {
    let kernel = Arc::new(SimKernel::new());
    let plugin = Plugin::new(
        PluginConfig::default(),
        KeyedSlots::new(),
        Arc::new(SimMemory::new()),
        Arc::clone(&kernel),
        kernel,
    );
    plugin.memory.map(DATA, 0x10_000, Protection::ReadWrite);
    let mut host = SimHost::new(&plugin, CallTable::nt_services());
    plugin.initialize(host.table_mut()).unwrap();
    let host = &host;
    let plugin = &plugin;

    std::thread::scope(|s| {
        for tid in 0..8u32 {
            s.spawn(move || {
                let caller = target(100 + tid);
                let buf = DATA + tid as u64 * 0x100;
                for _ in 0..200 {
                    let class = if tid % 2 == 0 { process::DEBUG_PORT } else { process::DEBUG_FLAGS };
                    let out = host.syscall(&caller, "QueryInformationProcess", &[0, class, buf, 8, 0], |args| {
                        plugin.memory.poke(args[2], &u64::MAX.to_le_bytes());
                        NtStatus::SUCCESS
                    });
                    assert_eq!(out.status, NtStatus::SUCCESS);
                    let expect = if tid % 2 == 0 { 0 } else { 0xFFFF_FFFF_0000_0001 };
                    assert_eq!(plugin.memory.peek_u64(buf), Some(expect));
                }
            });
        }
    });
    assert_eq!(plugin.slots.threads_in_flight(), 0);
}

#[test]
fn faulting_buffers_are_contained() {
    let p = plugin();
    let host = host(&p);
    p.memory.map(DATA + 0x1000, 0x1000, Protection::ReadOnly);
    let out = host.syscall(
        &target(1),
        "QueryInformationProcess",
        &[0, process::DEBUG_PORT, DATA + 0x1000, 8, 0xBAD0_0000],
        |_| NtStatus::SUCCESS,
    );
    assert_eq!(out.status, NtStatus::SUCCESS);
    assert_eq!(p.trail.pop().map(|e| e.patch), Some(Patch::DebugPort { ok: false }));
}
