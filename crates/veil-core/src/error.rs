//! Veil error types.
//!
//! Only lifecycle, registration and configuration can fail. The entry and
//! return callbacks never produce a `VeilError`; everything that goes
//! wrong inside them becomes a status value for the original caller.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VeilError {
    /// Service name the host cannot intercept.
    UnknownCall(String),
    /// Service already has a callback bound.
    AlreadyRegistered(String),
    /// Service has no callback bound.
    NotRegistered(String),
    /// Plugin initialized twice.
    AlreadyInitialized,
    /// Plugin used before initialization.
    NotInitialized,
    /// Configuration rejected by validation.
    InvalidConfig(&'static str),
}

impl fmt::Display for VeilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCall(name) => write!(f, "unknown service {}", name),
            Self::AlreadyRegistered(name) => write!(f, "callback already set for {}", name),
            Self::NotRegistered(name) => write!(f, "no callback set for {}", name),
            Self::AlreadyInitialized => write!(f, "plugin already initialized"),
            Self::NotInitialized => write!(f, "plugin not initialized"),
            Self::InvalidConfig(reason) => write!(f, "invalid config: {}", reason),
        }
    }
}

impl std::error::Error for VeilError {}

pub type Result<T> = std::result::Result<T, VeilError>;
