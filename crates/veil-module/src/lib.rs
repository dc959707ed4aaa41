//! # veil-module — Default implementations
//!
//! This crate provides a default implementation for every collaborator
//! trait in `veil-core`, enough to drive the engine end to end without a
//! real interception host. Correctness and simplicity come first.
//!
//! ## Default stack
//!
//! | Trait              | Default Impl      | Alternative                    |
//! |--------------------|-------------------|--------------------------------|
//! | SlotStore          | LocalSlots        | KeyedSlots (foreign threads)   |
//! | MemoryAccess       | SimMemory         | ProcessVmMemory (Linux)        |
//! | HandleTable        | SimKernel         | host object manager            |
//! | ExecutionContext   | SimKernel         | host executive                 |
//! | CallRegistry       | CallTable         | host syscall table             |
//!
//! `PatchTrail` is the bounded record of patches the engine applied, and
//! `SimHost` plays the interception host around a `CallTable`.

pub mod local_slots;
pub mod keyed_slots;
pub mod sim_memory;
pub mod sim_kernel;
pub mod call_table;
pub mod patch_trail;
pub mod sim_host;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod process_vm;
        pub use process_vm::{current_thread_key, ProcessVmMemory};
    }
}

pub use local_slots::LocalSlots;
pub use keyed_slots::KeyedSlots;
pub use sim_memory::{Protection, SimMemory};
pub use sim_kernel::SimKernel;
pub use call_table::CallTable;
pub use patch_trail::{Patch, PatchEvent, PatchTrail};
pub use sim_host::{Outcome, PendingCall, SimHost, SimMachine};
