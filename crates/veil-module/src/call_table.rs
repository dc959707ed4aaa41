//! `CallTable`: default `CallRegistry` implementation.
//!
//! The table of system services the host is able to hook, and which of
//! them currently route to the plugin. Names are service names without
//! the `Nt`/`Zw` prefix, as the host's hooking layer reports them.

use veil_core::call::CallId;
use veil_core::error::{Result, VeilError};
use veil_core::registry::CallRegistry;

use std::collections::{HashMap, HashSet};

/// Services a typical NT syscall table exposes for hooking. Superset of
/// what the plugin binds.
const NT_SERVICES: &[&str] = &[
    "Close",
    "CreateFile",
    "CreateThreadEx",
    "DuplicateObject",
    "GetContextThread",
    "OpenProcess",
    "OpenThread",
    "QueryInformationProcess",
    "QueryInformationThread",
    "QueryObject",
    "QuerySystemInformation",
    "ReadVirtualMemory",
    "SetContextThread",
    "SetInformationThread",
    "WriteVirtualMemory",
    "YieldExecution",
];

#[derive(Debug, Default)]
pub struct CallTable {
    hookable: HashSet<String>,
    bound: HashMap<String, CallId>,
}

impl CallTable {
    /// Table hooking exactly `names`.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hookable: names.into_iter().map(Into::into).collect(),
            bound: HashMap::new(),
        }
    }

    /// Table over the common NT services.
    pub fn nt_services() -> Self {
        Self::new(NT_SERVICES.iter().copied())
    }

    /// Call id bound to `name`, if the plugin registered for it.
    pub fn route(&self, name: &str) -> Option<CallId> {
        self.bound.get(name).copied()
    }

    pub fn is_hookable(&self, name: &str) -> bool {
        self.hookable.contains(name)
    }

    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }
}

impl CallRegistry for CallTable {
    fn set_callback(&mut self, name: &str, id: CallId) -> Result<()> {
        if !self.hookable.contains(name) {
            return Err(VeilError::UnknownCall(name.to_string()));
        }
        if self.bound.contains_key(name) {
            return Err(VeilError::AlreadyRegistered(name.to_string()));
        }
        self.bound.insert(name.to_string(), id);
        Ok(())
    }

    fn unset_callback(&mut self, name: &str) -> Result<()> {
        match self.bound.remove(name) {
            Some(_) => Ok(()),
            None => Err(VeilError::NotRegistered(name.to_string())),
        }
    }
}
