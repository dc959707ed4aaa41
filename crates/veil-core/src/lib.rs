//! # veil-core — Trait definitions for Veil
//!
//! Veil is the decision engine of a syscall-interception plugin that hides a
//! debugger from the process being debugged. The interception host calls
//! into it twice per intercepted call: on entry, before the real service
//! runs, and on return, before the result reaches the caller.
//!
//! This crate defines the vocabulary shared by the engine and the host:
//! every external collaborator is a trait here, with default implementations
//! living in `veil-module`.
//!
//! ## Modules
//!
//! - `call` - Intercepted call identifiers and the `Interceptor` contract
//! - `machine` - Argument/register view and caller metadata
//! - `slots` - Slot ids and the per-thread `SlotStore` trait
//! - `memory` - Fault-contained `MemoryAccess` trait
//! - `object` - Handle table services (`HandleTable`)
//! - `exec` - Execution context services (`ExecutionContext`)
//! - `registry` - Callback registration (`CallRegistry`)
//! - `status` - NTSTATUS values
//! - `info_class` - Process/thread information classes
//! - `layout` - Named field tables for patched structures
//! - `error` - Error types for lifecycle and configuration
//! - `spinlock` - Short-section spinlock
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod call;
pub mod machine;
pub mod slots;
pub mod memory;
pub mod object;
pub mod exec;
pub mod registry;
pub mod status;
pub mod info_class;
pub mod layout;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

pub use call::{Action, CallId, Interceptor, Substitute};
pub use machine::{CallerInfo, MachineState, ThreadKey};
pub use slots::{SlotId, SlotStore};
pub use memory::MemoryAccess;
pub use object::{AccessMask, Handle, HandleInfo, HandleTable, ObjectRef, ObjectType};
pub use exec::{ExecutionContext, PriorityGuard, PriorityLevel, ProcessorMode};
pub use registry::CallRegistry;
pub use status::NtStatus;
pub use error::{Result, VeilError};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
