//! Plugin activation, deactivation and target selection.
//!
//! These run outside the callback path, so they may log and fail.

use veil_core::call::CallId;
use veil_core::error::{Result, VeilError};
use veil_core::exec::ExecutionContext;
use veil_core::machine::CallerInfo;
use veil_core::memory::MemoryAccess;
use veil_core::object::HandleTable;
use veil_core::registry::CallRegistry;
use veil_core::slots::SlotStore;
use veil_core::{kdebug, kinfo, kwarn};

use std::sync::atomic::Ordering;

use crate::config::PluginConfig;
use crate::Plugin;

impl<S, M, H, X> Plugin<S, M, H, X>
where
    S: SlotStore,
    M: MemoryAccess,
    H: HandleTable,
    X: ExecutionContext,
{
    /// Bind every intercepted service to its call id.
    ///
    /// On failure, services bound so far are unbound again and the plugin
    /// stays uninitialized.
    pub fn initialize(&self, registry: &mut dyn CallRegistry) -> Result<()> {
        self.config.validate()?;
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(VeilError::AlreadyInitialized);
        }
        kinfo!("plugin initializing (target {})", self.config.target_process);

        for (i, call) in CallId::ALL.iter().enumerate() {
            if let Err(e) = registry.set_callback(call.service_name(), *call) {
                kwarn!("set_callback({}) failed: {}", call.service_name(), e);
                for bound in &CallId::ALL[..i] {
                    let _ = registry.unset_callback(bound.service_name());
                }
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
            kdebug!("callback set: {} -> probe {}", call.service_name(), call.as_raw());
        }

        kinfo!("plugin initialized");
        Ok(())
    }

    /// Unbind every intercepted service. Keeps going past individual
    /// failures and reports the first one.
    pub fn deinitialize(&self, registry: &mut dyn CallRegistry) -> Result<()> {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return Err(VeilError::NotInitialized);
        }
        kinfo!("plugin deinitializing");

        let mut first_err = None;
        for call in CallId::ALL {
            if let Err(e) = registry.unset_callback(call.service_name()) {
                kwarn!("unset_callback({}) failed: {}", call.service_name(), e);
                first_err.get_or_insert(e);
            }
        }

        let dropped = self.trail.dropped();
        if dropped > 0 {
            kwarn!("patch trail dropped {} events", dropped);
        }
        kinfo!("plugin deinitialized");
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

/// Exact, case-sensitive image-name match. Hosts may call this on the
/// callback path, so it does not log; the host reports matches.
pub fn is_target(config: &PluginConfig, caller: &CallerInfo) -> bool {
    caller.process_name == config.target_process
}
