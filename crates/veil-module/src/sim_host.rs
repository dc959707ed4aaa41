//! `SimHost`: stand-in for the interception host.
//!
//! Drives an `Interceptor` the way a syscall-table hooking host does:
//! route the service name through the `CallTable`, ask the plugin once
//! per process whether it is a target, deliver entry, run either the real
//! service or the chosen substitute, deliver return, and hand the final
//! return register back to the caller.
//!
//! `enter` and `complete` are separate so tests can interleave other
//! calls between the two phases of one call, as a real host may.

use veil_core::call::{Action, CallId, Interceptor};
use veil_core::machine::{CallerInfo, MachineState, ThreadKey};
use veil_core::spinlock::SpinLock;
use veil_core::status::NtStatus;
use veil_core::kinfo;

use crate::call_table::CallTable;

use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Register view of one simulated call.
#[derive(Debug, Clone)]
pub struct SimMachine {
    args: Vec<u64>,
    ret: u64,
    thread: ThreadKey,
}

impl SimMachine {
    pub fn new(thread: ThreadKey, args: &[u64]) -> Self {
        Self {
            args: args.to_vec(),
            ret: 0,
            thread,
        }
    }

    pub fn args(&self) -> &[u64] {
        &self.args
    }
}

impl MachineState for SimMachine {
    fn read_argument(&self, index: usize) -> u64 {
        self.args.get(index).copied().unwrap_or(0)
    }

    fn read_return_value(&self) -> u64 {
        self.ret
    }

    fn write_return_value(&mut self, value: u64) {
        self.ret = value;
    }

    fn thread_key(&self) -> ThreadKey {
        self.thread
    }
}

/// A call between its entry and return phases.
#[derive(Debug)]
pub struct PendingCall {
    call: Option<CallId>,
    action: Action,
    machine: SimMachine,
    caller: CallerInfo,
}

impl PendingCall {
    /// The id the call was routed under; `None` if the plugin never saw it.
    pub fn call(&self) -> Option<CallId> {
        self.call
    }

    pub fn action(&self) -> Action {
        self.action
    }
}

/// What the caller of the intercepted service observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: NtStatus,
    pub redirected: bool,
    pub real_ran: bool,
}

pub struct SimHost<'a, I: Interceptor> {
    plugin: &'a I,
    table: CallTable,
    targets: SpinLock<HashMap<u32, bool>>,
}

impl<'a, I: Interceptor> SimHost<'a, I> {
    pub fn new(plugin: &'a I, table: CallTable) -> Self {
        Self {
            plugin,
            table,
            targets: SpinLock::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &CallTable {
        &self.table
    }

    /// For plugin `initialize` / `deinitialize`.
    pub fn table_mut(&mut self) -> &mut CallTable {
        &mut self.table
    }

    /// Cached per pid. The predicate runs under the cache lock, so
    /// threads of a new process racing into their first call still see a
    /// single evaluation.
    fn is_target(&self, caller: &CallerInfo) -> bool {
        let (hit, first) = match self.targets.lock().entry(caller.process_id) {
            Entry::Occupied(seen) => (*seen.get(), false),
            Entry::Vacant(slot) => (*slot.insert(self.plugin.is_target(caller)), true),
        };
        if hit && first {
            kinfo!("target process {} (pid {})", caller.process_name, caller.process_id);
        }
        hit
    }

    /// Entry phase of `name` called by `caller` with `args`.
    pub fn enter(&self, caller: &CallerInfo, name: &str, args: &[u64]) -> PendingCall {
        let mut machine = SimMachine::new(caller.thread_key(), args);
        let call = self.table.route(name).filter(|_| self.is_target(caller));
        let action = match call {
            Some(id) => self.plugin.on_entry(id, &mut machine, caller),
            None => Action::Continue,
        };
        PendingCall {
            call,
            action,
            machine,
            caller: caller.clone(),
        }
    }

    /// Service phase and return phase. `real` is the genuine service; it
    /// only runs if the entry phase let the call continue.
    pub fn complete<F>(&self, pending: PendingCall, real: F) -> Outcome
    where
        F: FnOnce(&[u64]) -> NtStatus,
    {
        let PendingCall {
            call,
            action,
            mut machine,
            caller,
        } = pending;

        let (redirected, real_ran) = match action {
            Action::Continue => {
                let status = real(machine.args());
                machine.write_return_value(status.to_register());
                (false, true)
            }
            Action::Redirect(substitute) => {
                if let Some(status) = self.plugin.run_substitute(substitute, &mut machine) {
                    machine.write_return_value(status.to_register());
                }
                (true, false)
            }
        };

        if let Some(id) = call {
            self.plugin.on_return(id, &mut machine, &caller);
        }

        Outcome {
            status: NtStatus::from_register(machine.read_return_value()),
            redirected,
            real_ran,
        }
    }

    /// One whole intercepted call.
    pub fn syscall<F>(&self, caller: &CallerInfo, name: &str, args: &[u64], real: F) -> Outcome
    where
        F: FnOnce(&[u64]) -> NtStatus,
    {
        let pending = self.enter(caller, name, args);
        self.complete(pending, real)
    }
}
