//! Plugin configuration

use veil_core::env::{env_get, env_get_str};
use veil_core::error::{Result, VeilError};

/// Process name the plugin activates for unless told otherwise.
pub const DEFAULT_TARGET: &str = "al-khaser.exe";

/// Default patch trail capacity.
pub const DEFAULT_TRAIL_DEPTH: usize = 1024;

/// Configuration for the anti-debug plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Image name of the process to hide the debugger from (exact match)
    pub target_process: String,

    /// Capacity of the patch trail
    pub trail_depth: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            target_process: DEFAULT_TARGET.to_string(),
            trail_depth: DEFAULT_TRAIL_DEPTH,
        }
    }
}

impl PluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `VEIL_TARGET` and `VEIL_TRAIL_DEPTH`.
    pub fn from_env() -> Self {
        Self {
            target_process: env_get_str("VEIL_TARGET", DEFAULT_TARGET),
            trail_depth: env_get("VEIL_TRAIL_DEPTH", DEFAULT_TRAIL_DEPTH),
        }
    }

    /// Set the target process name
    pub fn target_process(mut self, name: impl Into<String>) -> Self {
        self.target_process = name.into();
        self
    }

    /// Set the patch trail capacity
    pub fn trail_depth(mut self, depth: usize) -> Self {
        self.trail_depth = depth;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.target_process.is_empty() {
            return Err(VeilError::InvalidConfig("target_process must not be empty"));
        }
        if self.target_process.contains(['/', '\\']) {
            return Err(VeilError::InvalidConfig("target_process is an image name, not a path"));
        }
        if self.trail_depth == 0 {
            return Err(VeilError::InvalidConfig("trail_depth must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = PluginConfig::default();
        assert_eq!(cfg.target_process, "al-khaser.exe");
        assert_eq!(cfg.trail_depth, 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder_and_validation() {
        let cfg = PluginConfig::new().target_process("sample.exe").trail_depth(8);
        assert_eq!(cfg.target_process, "sample.exe");
        assert!(cfg.validate().is_ok());

        assert!(PluginConfig::new().target_process("").validate().is_err());
        assert!(PluginConfig::new().target_process(r"C:\x\a.exe").validate().is_err());
        assert_eq!(
            PluginConfig::new().trail_depth(0).validate(),
            Err(VeilError::InvalidConfig("trail_depth must be at least 1"))
        );
    }

    #[test]
    fn from_env_reads_overrides() {
        std::env::set_var("VEIL_TARGET", "other.exe");
        std::env::set_var("VEIL_TRAIL_DEPTH", "16");
        let cfg = PluginConfig::from_env();
        std::env::remove_var("VEIL_TARGET");
        std::env::remove_var("VEIL_TRAIL_DEPTH");
        assert_eq!(cfg.target_process, "other.exe");
        assert_eq!(cfg.trail_depth, 16);
    }
}
