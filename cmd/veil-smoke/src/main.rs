//! Veil End-to-End Smoke Test
//!
//! Drives the decision engine through `SimHost` with `ProcessVmMemory`, so
//! every patch lands in (or faults on) real memory of this process:
//!   Part A — Activation: registration and target selection
//!   Part B — Process queries: debug port, flags, object handle
//!   Part C — Thread queries and context: WOW64 Dr*, hide flag, CONTEXT
//!   Part D — Substitutes: close decision, hide-from-debugger set
//!   Part E — Fault containment: patches aimed at a PROT_NONE page
//!
//! Run: ./target/release/veil-smoke
//! (Linux only; no privileges needed)

use veil_core::info_class::{process, thread};
use veil_core::layout::{context, wow64_context};
use veil_core::machine::CallerInfo;
use veil_core::object::{attributes, AccessMask, Handle, ObjectType};
use veil_core::status::NtStatus;
use veil_core::{kinfo, kwarn};

use veil_engine::{Plugin, PluginConfig};
use veil_module::{current_thread_key, CallTable, LocalSlots, Patch, ProcessVmMemory, SimHost, SimKernel};

use std::sync::Arc;

type SmokePlugin = Plugin<LocalSlots, ProcessVmMemory, Arc<SimKernel>, Arc<SimKernel>>;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.total += 1;
        if ok {
            self.passed += 1;
            println!("  [{:2}] {:<52} PASS", self.total, name);
        } else {
            self.failed += 1;
            println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ── Scratch memory ──

/// One read-write page followed by one PROT_NONE guard page.
struct Scratch {
    base: *mut u8,
    page: usize,
}

impl Scratch {
    fn map() -> Option<Self> {
        // Safety: plain anonymous mapping; checked below.
        unsafe {
            let page = libc::sysconf(libc::_SC_PAGESIZE) as usize;
            let base = libc::mmap(
                std::ptr::null_mut(),
                page * 2,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                return None;
            }
            if libc::mprotect(base.cast::<u8>().add(page).cast(), page, libc::PROT_NONE) != 0 {
                libc::munmap(base, page * 2);
                return None;
            }
            Some(Self { base: base.cast(), page })
        }
    }

    fn addr(&self, off: usize) -> u64 {
        self.base as u64 + off as u64
    }

    fn guard(&self) -> u64 {
        self.addr(self.page)
    }

    fn fill(&self, off: usize, byte: u8, len: usize) {
        // Safety: callers stay inside the read-write page.
        unsafe { std::ptr::write_bytes(self.base.add(off), byte, len) }
    }

    fn put_u32(&self, off: usize, v: u32) {
        unsafe { std::ptr::write_unaligned(self.base.add(off).cast::<u32>(), v) }
    }

    fn put_u64(&self, off: usize, v: u64) {
        unsafe { std::ptr::write_unaligned(self.base.add(off).cast::<u64>(), v) }
    }

    fn u8_at(&self, off: usize) -> u8 {
        unsafe { std::ptr::read_volatile(self.base.add(off)) }
    }

    fn u32_at(&self, off: usize) -> u32 {
        unsafe { std::ptr::read_unaligned(self.base.add(off).cast::<u32>()) }
    }

    fn u64_at(&self, off: usize) -> u64 {
        unsafe { std::ptr::read_unaligned(self.base.add(off).cast::<u64>()) }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.cast(), self.page * 2);
        }
    }
}

const DATA: usize = 0x000;
const LEN: usize = 0x010;
const CTX: usize = 0x100;

fn me() -> CallerInfo {
    let key = current_thread_key().as_u64();
    CallerInfo::new("al-khaser.exe", (key >> 32) as u32, key as u32)
}

// ════════════════════════════════════════════════════════════
// Part A: Activation
// ════════════════════════════════════════════════════════════

fn test_activation(t: &mut TestRunner, plugin: &SmokePlugin, host: &mut SimHost<'_, SmokePlugin>) -> bool {
    t.section("Part A: Activation");

    let init = plugin.initialize(host.table_mut());
    t.check("initialize", init.is_ok(), &format!("{:?}", init));
    t.check("five services bound", host.table().bound_count() == 5, "bound_count != 5");
    t.check(
        "second initialize refused",
        plugin.initialize(host.table_mut()).is_err(),
        "accepted twice",
    );

    let outsider = CallerInfo::new("notepad.exe", 1, 1);
    let out = host.syscall(&outsider, "Close", &[0x1234], |_| NtStatus::INVALID_HANDLE);
    t.check("non-target passes through", out.real_ran && !out.redirected, "intercepted");

    init.is_ok()
}

// ════════════════════════════════════════════════════════════
// Part B: Process queries
// ════════════════════════════════════════════════════════════

fn test_process_queries(t: &mut TestRunner, host: &SimHost<'_, SmokePlugin>, mem: &Scratch) {
    t.section("Part B: Process queries");
    let caller = me();

    // Scenario A: debugger present, kernel wrote a port and length 8.
    let out = host.syscall(
        &caller,
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_PORT, mem.addr(DATA), 8, mem.addr(LEN)],
        |_| {
            mem.put_u64(DATA, u64::MAX);
            mem.put_u32(LEN, 8);
            NtStatus::SUCCESS
        },
    );
    t.check("debug port reads 0", mem.u64_at(DATA) == 0, &format!("{:#x}", mem.u64_at(DATA)));
    t.check("debug port length kept", mem.u32_at(LEN) == 8, &format!("{}", mem.u32_at(LEN)));
    t.check("debug port status", out.status == NtStatus::SUCCESS, &out.status.to_string());

    host.syscall(
        &caller,
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_FLAGS, mem.addr(DATA), 4, 0],
        |_| {
            mem.put_u32(DATA, 0);
            NtStatus::SUCCESS
        },
    );
    t.check("debug flags reads 1", mem.u32_at(DATA) == 1, &format!("{}", mem.u32_at(DATA)));

    let out = host.syscall(
        &caller,
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_OBJECT_HANDLE, mem.addr(DATA), 8, 0],
        |_| {
            mem.put_u64(DATA, 0x1C4);
            NtStatus::SUCCESS
        },
    );
    t.check("debug object handle NULL", mem.u64_at(DATA) == 0, &format!("{:#x}", mem.u64_at(DATA)));
    t.check(
        "debug object status PORT_NOT_SET",
        out.status == NtStatus::PORT_NOT_SET,
        &out.status.to_string(),
    );

    // Buffer and return length aliased.
    host.syscall(
        &caller,
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_PORT, mem.addr(DATA), 8, mem.addr(DATA)],
        |_| {
            mem.put_u64(DATA, 8);
            NtStatus::SUCCESS
        },
    );
    t.check("aliased length restored", mem.u32_at(DATA) == 8, &format!("{}", mem.u32_at(DATA)));
}

// ════════════════════════════════════════════════════════════
// Part C: Thread queries and context
// ════════════════════════════════════════════════════════════

fn test_thread_queries(t: &mut TestRunner, host: &SimHost<'_, SmokePlugin>, mem: &Scratch) {
    t.section("Part C: Thread queries and context");
    let caller = me();

    host.syscall(
        &caller,
        "QueryInformationThread",
        &[Handle::CURRENT_THREAD.0, thread::WOW64_CONTEXT, mem.addr(CTX), 0, 0],
        |_| {
            mem.fill(CTX, 0xCC, wow64_context::SIZE);
            NtStatus::SUCCESS
        },
    );
    let zeroed = wow64_context::DEBUG_REGISTERS
        .iter()
        .all(|f| mem.u32_at(CTX + f.offset as usize) == 0);
    t.check("WOW64 Dr0-Dr7 zeroed", zeroed, "debug register survived");
    t.check("WOW64 FloatSave intact", mem.u32_at(CTX + 0x1C) == 0xCCCC_CCCC, "neighbour clobbered");

    host.syscall(
        &caller,
        "QueryInformationThread",
        &[Handle::CURRENT_THREAD.0, thread::HIDE_FROM_DEBUGGER, mem.addr(DATA), mem.addr(LEN), 0],
        |_| {
            mem.put_u32(DATA, 0);
            mem.put_u32(LEN, 1);
            NtStatus::SUCCESS
        },
    );
    t.check("hide-from-debugger reads 1", mem.u8_at(DATA) == 1, &format!("{}", mem.u8_at(DATA)));
    t.check("hide-from-debugger length kept", mem.u32_at(LEN) == 1, &format!("{}", mem.u32_at(LEN)));

    host.syscall(
        &caller,
        "GetContextThread",
        &[Handle::CURRENT_THREAD.0, mem.addr(CTX)],
        |_| {
            mem.fill(CTX, 0xAB, context::SIZE);
            NtStatus::SUCCESS
        },
    );
    let scrubbed = context::DEBUG_REGISTERS
        .iter()
        .chain(context::BRANCH_TRACE.iter())
        .all(|f| mem.u64_at(CTX + f.offset as usize) == 0);
    t.check("CONTEXT Dr*/LBR zeroed", scrubbed, "debug state survived");
    t.check(
        "CONTEXT Rax intact",
        mem.u64_at(CTX + 0x78) == 0xABAB_ABAB_ABAB_ABAB,
        "neighbour clobbered",
    );
}

// ════════════════════════════════════════════════════════════
// Part D: Substitutes
// ════════════════════════════════════════════════════════════

fn test_substitutes(t: &mut TestRunner, plugin: &SmokePlugin, host: &SimHost<'_, SmokePlugin>, mem: &Scratch) {
    t.section("Part D: Substitutes");
    let caller = me();
    let kernel = &plugin.handles;
    kernel.set_debug_port(true);

    // Scenario B
    let out = host.syscall(&caller, "Close", &[0xDEAD_BEE0], |_| NtStatus::SUCCESS);
    t.check("close invalid -> INVALID_HANDLE", out.status == NtStatus::INVALID_HANDLE, &out.status.to_string());
    t.check("close invalid redirected", out.redirected && !out.real_ran, "real NtClose ran");
    t.check("close invalid closed nothing", kernel.close_calls() == 0, "close performed");

    let protected = kernel.insert(ObjectType::File, AccessMask::NONE, attributes::PROTECT_CLOSE);
    let out = host.syscall(&caller, "Close", &[protected.0], |_| NtStatus::SUCCESS);
    t.check(
        "close protected -> HANDLE_NOT_CLOSABLE",
        out.status == NtStatus::HANDLE_NOT_CLOSABLE,
        &out.status.to_string(),
    );

    let plain = kernel.insert(ObjectType::Event, AccessMask::NONE, 0);
    let out = host.syscall(&caller, "Close", &[plain.0], |_| NtStatus::SUCCESS);
    t.check("close plain handle", out.status == NtStatus::SUCCESS && !kernel.is_open(plain), "still open");

    // Scenario C
    let thread_handle = kernel.insert(ObjectType::Thread, AccessMask::THREAD_ALL_ACCESS, 0);
    mem.put_u32(DATA, 0);
    let out = host.syscall(
        &caller,
        "SetInformationThread",
        &[thread_handle.0, thread::HIDE_FROM_DEBUGGER, mem.addr(DATA), 4],
        |args| kernel.hide_thread(Handle(args[0])),
    );
    t.check("hide set -> SUCCESS", out.status == NtStatus::SUCCESS, &out.status.to_string());
    t.check("thread not actually hidden", !kernel.is_thread_hidden(thread_handle), "real call ran");

    let out = host.syscall(
        &caller,
        "SetInformationThread",
        &[thread_handle.0, thread::HIDE_FROM_DEBUGGER, mem.guard(), 4],
        |_| NtStatus::SUCCESS,
    );
    t.check(
        "hide set, bad buffer -> ACCESS_VIOLATION",
        out.status == NtStatus::ACCESS_VIOLATION,
        &out.status.to_string(),
    );
    t.check("references released", kernel.outstanding_references() == 0, "leaked reference");

    kernel.set_debug_port(false);
}

// ════════════════════════════════════════════════════════════
// Part E: Fault containment
// ════════════════════════════════════════════════════════════

fn test_faults(t: &mut TestRunner, plugin: &SmokePlugin, host: &SimHost<'_, SmokePlugin>, mem: &Scratch) {
    t.section("Part E: Fault containment");
    let caller = me();
    let _ = plugin.trail.drain();

    host.syscall(
        &caller,
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_PORT, mem.guard(), 8, mem.guard() + 8],
        |_| NtStatus::SUCCESS,
    );
    let faulted = matches!(plugin.trail.pop().map(|e| e.patch), Some(Patch::DebugPort { ok: false }));
    t.check("debug port into guard page reported", faulted, "no fault recorded");

    // CONTEXT straddling into the guard page: Dr* land, LBR faults.
    let ctx = mem.page - 0x400;
    host.syscall(
        &caller,
        "GetContextThread",
        &[Handle::CURRENT_THREAD.0, mem.addr(ctx)],
        |_| NtStatus::SUCCESS,
    );
    let partial = matches!(
        plugin.trail.pop().map(|e| e.patch),
        Some(Patch::ContextDebugRegisters { zeroed: 6 })
    );
    t.check("straddling CONTEXT zeroes what it can", partial, "unexpected count");

    host.syscall(
        &caller,
        "QueryInformationProcess",
        &[Handle::CURRENT_PROCESS.0, process::DEBUG_PORT, 0, 8, 0],
        |_| NtStatus::SUCCESS,
    );
    t.check("null buffer leaves no patch", plugin.trail.is_empty(), "patched through NULL");
    t.check("process still alive", true, "");
}

// ════════════════════════════════════════════════════════════

fn main() {
    println!("=== Veil End-to-End Smoke Test ===");
    println!("    pid: {}", std::process::id());

    let mut t = TestRunner::new();

    let Some(mem) = Scratch::map() else {
        println!("\nFATAL: mmap of scratch pages failed");
        t.summary();
        std::process::exit(1);
    };

    let kernel = Arc::new(SimKernel::new());
    let plugin: SmokePlugin = Plugin::new(
        PluginConfig::default(),
        LocalSlots::new(),
        ProcessVmMemory::current(),
        Arc::clone(&kernel),
        kernel,
    );
    let mut host = SimHost::new(&plugin, CallTable::nt_services());

    if test_activation(&mut t, &plugin, &mut host) {
        test_process_queries(&mut t, &host, &mem);
        test_thread_queries(&mut t, &host, &mem);
        test_substitutes(&mut t, &plugin, &host, &mem);
        test_faults(&mut t, &plugin, &host, &mem);
    }

    for event in plugin.trail.drain() {
        kinfo!("{}", event);
    }
    if let Err(e) = plugin.deinitialize(host.table_mut()) {
        kwarn!("deinitialize: {}", e);
    }
    drop(mem);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
