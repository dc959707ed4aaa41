//! Callback registration with the interception host.
//!
//! At activation the plugin binds each service name it cares about to a
//! `CallId`; the host then tags every callback with that id. Deactivation
//! reverses the binding.
//!
//! # Implementors
//!
//! - `CallTable` (veil-module): table of hookable service names.

use crate::call::CallId;
use crate::error::Result;

pub trait CallRegistry {
    /// Route callbacks for service `name` to the plugin, tagged with `id`.
    fn set_callback(&mut self, name: &str, id: CallId) -> Result<()>;

    /// Stop routing callbacks for service `name`.
    fn unset_callback(&mut self, name: &str) -> Result<()>;
}
