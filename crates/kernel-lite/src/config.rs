//! Kernel configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! is a valid configuration.

use std::path::Path;

use anyhow::{Context, Result};
use kernel_wire::{CopyPolicy, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// User name written into headers the kernel generates.
    pub user_name: String,

    /// Protocol version reported by the kernel.
    pub protocol_version: String,

    /// Whether buffers handed in by the host are aliased or copied.
    pub inbound_buffers: CopyPolicy,

    /// Whether buffers handed out to the host alias module memory or are
    /// copied. Module memory can move when it grows, so this defaults to
    /// copying.
    pub outbound_buffers: CopyPolicy,

    /// Default log filter (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            inbound_buffers: CopyPolicy::Borrow,
            outbound_buffers: CopyPolicy::Copy,
            log_level: "info".to_string(),
        }
    }
}

impl KernelConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse kernel config")
    }

    /// Load config from a JSON file, returning defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }
}

fn default_user_name() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unspecified user".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = KernelConfig::from_json("{}").unwrap();
        assert_eq!(config, KernelConfig::default());
        assert_eq!(config.protocol_version, "5.3");
        assert_eq!(config.inbound_buffers, CopyPolicy::Borrow);
        assert_eq!(config.outbound_buffers, CopyPolicy::Copy);
        assert!(!config.user_name.is_empty());
    }

    #[test]
    fn test_partial_config_overrides_fields() {
        let config =
            KernelConfig::from_json(r#"{"user_name": "ada", "outbound_buffers": "borrow"}"#)
                .unwrap();
        assert_eq!(config.user_name, "ada");
        assert_eq!(config.outbound_buffers, CopyPolicy::Borrow);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        assert!(KernelConfig::from_json(r#"{"inbound_buffers": "share"}"#).is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = KernelConfig::load(&dir.path().join("kernel.json")).unwrap();
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kernel.json");
        std::fs::write(&path, r#"{"log_level": "debug"}"#).unwrap();
        let config = KernelConfig::load(&path).unwrap();
        assert_eq!(config.log_level, "debug");

        std::fs::write(&path, "not json").unwrap();
        let err = KernelConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid config"));
    }
}
