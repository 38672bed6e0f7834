//! Collator configuration
//!
//! Defaults match the host library: operations without a terminal sub-event
//! are expired after 20 s, checked once per second.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default age after which an open operation is reported as timed out
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// Default delay between two expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Sub-event name that completes an operation
pub const DEFAULT_TERMINAL_MARKER: &str = "end";

/// Tunables for the collation engine and its sweeper
///
/// # Example
/// ```
/// use gwtmetrics::config::CollatorConfig;
///
/// let config = CollatorConfig::default();
/// assert_eq!(config.timeout_ms, 20_000);
/// assert_eq!(config.terminal_marker, "end");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollatorConfig {
    /// Age (now - start) an open operation must exceed to be expired
    pub timeout_ms: u64,

    /// Fixed delay between the end of one sweep and the start of the next
    pub sweep_interval_ms: u64,

    /// Sub-event name that closes an operation normally
    pub terminal_marker: String,
}

impl Default for CollatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            terminal_marker: DEFAULT_TERMINAL_MARKER.to_string(),
        }
    }
}

impl CollatorConfig {
    /// Load and validate a TOML configuration file. Missing keys take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            bail!("Config file not found: {}", path_ref.display());
        }

        let contents = fs::read_to_string(path_ref).context("Failed to read config file")?;
        let config: CollatorConfig = toml::from_str(&contents).context("Invalid config TOML")?;
        config.validate()?;

        Ok(config)
    }

    /// Reject values that would make the sweeper spin or never close anything
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            bail!("Invalid config: timeout_ms must be > 0");
        }
        if self.sweep_interval_ms == 0 {
            bail!("Invalid config: sweep_interval_ms must be > 0");
        }
        if self.terminal_marker.trim().is_empty() {
            bail!("Invalid config: terminal_marker must not be empty");
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
