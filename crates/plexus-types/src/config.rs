//! Kernel configuration types.
//!
//! `KernelConfig` represents the host's `config.toml`: which modules to load,
//! the known module manifests, and bus/runtime timings. All fields have
//! defaults, so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::ModuleId;
use crate::module::ModuleManifest;

/// Top-level host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Mandatory module ids, loaded regardless of `modules`.
    #[serde(default = "default_core_modules")]
    pub core_modules: Vec<ModuleId>,

    /// Modules configured by the user.
    #[serde(default)]
    pub modules: Vec<ModuleId>,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Every known module (installed and available).
    #[serde(default)]
    pub manifests: Vec<ModuleManifest>,
}

fn default_core_modules() -> Vec<ModuleId> {
    vec![ModuleId::from("inventory")]
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            core_modules: default_core_modules(),
            modules: Vec::new(),
            bus: BusConfig::default(),
            runtime: RuntimeConfig::default(),
            manifests: Vec::new(),
        }
    }
}

/// Message bus limits and timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Pending messages per mailbox before the oldest is dropped.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Period of the idle-subscription purge.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,

    /// A subscription with no pull for this long is purged.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Reply timeout applied to messages buffered for a not-yet-subscribed module.
    #[serde(default = "default_buffered_timeout_secs")]
    pub buffered_timeout_secs: u64,
}

fn default_mailbox_capacity() -> usize {
    100
}

fn default_purge_interval_secs() -> u64 {
    60
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_buffered_timeout_secs() -> u64 {
    30
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            purge_interval_secs: default_purge_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            buffered_timeout_secs: default_buffered_timeout_secs(),
        }
    }
}

impl BusConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn buffered_timeout(&self) -> Duration {
        Duration::from_secs(self.buffered_timeout_secs)
    }
}

/// Module actor timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How long one loop tick waits on the mailbox.
    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,

    /// How long an actor waits for the core barrier before starting anyway.
    #[serde(default = "default_core_barrier_timeout_secs")]
    pub core_barrier_timeout_secs: u64,

    /// How long shutdown waits for each actor to finish.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_pull_timeout_ms() -> u64 {
    500
}

fn default_core_barrier_timeout_secs() -> u64 {
    60
}

fn default_stop_timeout_secs() -> u64 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pull_timeout_ms: default_pull_timeout_ms(),
            core_barrier_timeout_secs: default_core_barrier_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn core_barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.core_barrier_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.core_modules, vec![ModuleId::from("inventory")]);
        assert!(config.modules.is_empty());
        assert_eq!(config.bus.mailbox_capacity, 100);
        assert_eq!(config.bus.purge_interval(), Duration::from_secs(60));
        assert_eq!(config.bus.idle_timeout(), Duration::from_secs(600));
        assert_eq!(config.bus.buffered_timeout(), Duration::from_secs(30));
        assert_eq!(config.runtime.pull_timeout(), Duration::from_millis(500));
        assert_eq!(config.runtime.core_barrier_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn empty_toml_is_valid() {
        let config: KernelConfig = toml::from_str("").unwrap();
        assert_eq!(config.bus.mailbox_capacity, 100);
        assert_eq!(config.core_modules.len(), 1);
    }

    #[test]
    fn toml_with_values() {
        let toml_str = r#"
core_modules = ["inventory", "system"]
modules = ["audio"]

[bus]
mailbox_capacity = 10
idle_timeout_secs = 30

[runtime]
pull_timeout_ms = 100

[[manifests]]
id = "audio"
description = "Audio output"
dependencies = ["system"]

[[manifests]]
id = "system"
"#;
        let config: KernelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.core_modules.len(), 2);
        assert_eq!(config.modules, vec![ModuleId::from("audio")]);
        assert_eq!(config.bus.mailbox_capacity, 10);
        assert_eq!(config.bus.idle_timeout(), Duration::from_secs(30));
        // untouched fields keep their defaults
        assert_eq!(config.bus.purge_interval_secs, 60);
        assert_eq!(config.runtime.pull_timeout(), Duration::from_millis(100));
        assert_eq!(config.manifests.len(), 2);
        assert_eq!(config.manifests[0].dependencies[0], "system");
    }
}
