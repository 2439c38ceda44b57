//! Analysis configuration
//!
//! Loaded from TOML; every field is optional and falls back to the built-in defaults.
//!
//! ```toml
//! release_miss_limit = 20
//! acquired_miss_limit = 10
//!
//! [latency]
//! lock_latency = 100
//! miss_latency = 250
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Cycle costs used to turn counts into a modeled hold time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyModel {
    /// Cost of one uncontended lock acquisition
    #[serde(default = "default_lock_latency")]
    pub lock_latency: u64,

    /// Cost of one coherence miss or locked instruction
    #[serde(default = "default_miss_latency")]
    pub miss_latency: u64,
}

fn default_lock_latency() -> u64 {
    100
}

fn default_miss_latency() -> u64 {
    250
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self {
            lock_latency: default_lock_latency(),
            miss_latency: default_miss_latency(),
        }
    }
}

/// Tolerance for lock-protocol noise before the run aborts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissLimits {
    pub release: u32,
    pub acquired: u32,
}

impl Default for MissLimits {
    fn default() -> Self {
        Self {
            release: default_release_miss_limit(),
            acquired: default_acquired_miss_limit(),
        }
    }
}

/// Configuration for a serial-section analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SersecConfig {
    /// Releases of untracked locks tolerated before aborting (the limit-th aborts)
    #[serde(default = "default_release_miss_limit")]
    pub release_miss_limit: u32,

    /// `acquired` notifications for untracked locks tolerated before aborting
    #[serde(default = "default_acquired_miss_limit")]
    pub acquired_miss_limit: u32,

    #[serde(default)]
    pub latency: LatencyModel,
}

fn default_release_miss_limit() -> u32 {
    20
}

fn default_acquired_miss_limit() -> u32 {
    10
}

impl Default for SersecConfig {
    fn default() -> Self {
        Self {
            release_miss_limit: default_release_miss_limit(),
            acquired_miss_limit: default_acquired_miss_limit(),
            latency: LatencyModel::default(),
        }
    }
}

impl SersecConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not valid TOML, or sets a
    /// miss limit of zero.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SersecConfig =
            toml::from_str(content).context("Failed to parse TOML configuration")?;

        if config.release_miss_limit == 0 || config.acquired_miss_limit == 0 {
            anyhow::bail!("Miss limits must be at least 1");
        }
        Ok(config)
    }

    pub fn miss_limits(&self) -> MissLimits {
        MissLimits {
            release: self.release_miss_limit,
            acquired: self.acquired_miss_limit,
        }
    }
}
