//! # veil-engine — Anti-debug decision engine
//!
//! `Plugin` implements `veil_core::Interceptor` on top of the collaborator
//! traits: it captures arguments on entry, decides whether the real
//! service runs, and falsifies what the caller sees on return.
//!
//! ```text
//!   entry event ──▶ entry::on_entry ──▶ Continue ─────────▶ real service ─┐
//!                        │                                                │
//!                        └──────────▶ Redirect(Substitute) ─▶ substitute ─┤
//!                                                                         ▼
//!                                              exit::on_return ◀── return event
//! ```
//!
//! State crosses from entry to return only through the `SlotStore`. Every
//! write to caller memory goes through `MemoryAccess`. Nothing in the
//! callback path logs; applied patches land in the `PatchTrail`.

pub mod config;
pub mod lifecycle;
pub mod entry;
pub mod exit;
pub mod substitute;
pub mod close;

#[cfg(test)]
mod scenarios;

pub use config::PluginConfig;

use veil_core::call::{Action, CallId, Interceptor, Substitute};
use veil_core::exec::ExecutionContext;
use veil_core::machine::{CallerInfo, MachineState};
use veil_core::memory::MemoryAccess;
use veil_core::object::HandleTable;
use veil_core::slots::SlotStore;
use veil_core::status::NtStatus;
use veil_module::{LocalSlots, PatchTrail, SimKernel, SimMemory};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// The anti-debug plugin.
///
/// - `S`: where entry parks state for return
/// - `M`: fault-contained access to caller memory
/// - `H`: object manager
/// - `X`: executive (previous mode, debug port, priority)
pub struct Plugin<S, M, H, X> {
    pub config: PluginConfig,
    pub slots: S,
    pub memory: M,
    pub handles: H,
    pub exec: X,
    pub trail: PatchTrail,
    initialized: AtomicBool,
}

/// Plugin over the simulated kernel and address space. `handles` and
/// `exec` share one `SimKernel`.
pub type SimPlugin = Plugin<LocalSlots, Arc<SimMemory>, Arc<SimKernel>, Arc<SimKernel>>;

impl<S, M, H, X> Plugin<S, M, H, X>
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    pub fn new(config: PluginConfig, slots: S, memory: M, handles: H, exec: X) -> Self {
        let trail = PatchTrail::new(config.trail_depth);
        Self {
            config,
            slots,
            memory,
            handles,
            exec,
            trail,
            initialized: AtomicBool::new(false),
        }
    }

    /// Entry for hosts that hand over raw probe ids. Unknown ids continue.
    pub fn on_entry_raw(&self, probe_id: u32, state: &mut dyn MachineState, caller: &CallerInfo) -> Action {
        match CallId::from_raw(probe_id) {
            Some(call) => self.on_entry(call, state, caller),
            None => Action::Continue,
        }
    }

    /// Return for hosts that hand over raw probe ids. Unknown ids are ignored.
    pub fn on_return_raw(&self, probe_id: u32, state: &mut dyn MachineState, caller: &CallerInfo) {
        if let Some(call) = CallId::from_raw(probe_id) {
            self.on_return(call, state, caller);
        }
    }
}

impl SimPlugin {
    /// Fresh plugin over a new `SimMemory` and `SimKernel`.
    pub fn simulated(config: PluginConfig) -> Self {
        let kernel = Arc::new(SimKernel::new());
        Plugin::new(
            config,
            LocalSlots::new(),
            Arc::new(SimMemory::new()),
            Arc::clone(&kernel),
            kernel,
        )
    }
}

impl<S, M, H, X> Interceptor for Plugin<S, M, H, X>
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    fn is_target(&self, caller: &CallerInfo) -> bool {
        lifecycle::is_target(&self.config, caller)
    }

    fn on_entry(&self, call: CallId, state: &mut dyn MachineState, _caller: &CallerInfo) -> Action {
        entry::on_entry(self, call, state)
    }

    fn on_return(&self, call: CallId, state: &mut dyn MachineState, _caller: &CallerInfo) {
        exit::on_return(self, call, state)
    }

    fn run_substitute(&self, substitute: Substitute, state: &mut dyn MachineState) -> Option<NtStatus> {
        match substitute {
            Substitute::SetInformationThread => {
                let status = substitute::set_information_thread(&self.handles, &self.memory, &self.exec, state);
                self.trail.record(
                    CallId::SetInformationThread,
                    state.thread_key(),
                    veil_module::Patch::HideFromDebuggerSet(status),
                );
                Some(status)
            }
            Substitute::Close => substitute::close(),
        }
    }
}
