use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

/// Default currency assumed when a provider omits one.
fn default_currency() -> String {
    "USD".to_string()
}

/// Default absolute lookback cap (two years).
fn default_max_lookback() -> std::time::Duration {
    std::time::Duration::from_secs(730 * 24 * 60 * 60)
}

/// Default per-account fetch timeout.
fn default_fetch_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

fn default_window_days() -> u32 {
    90
}

fn default_max_concurrent_accounts() -> usize {
    4
}

/// Sync engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Absolute cap on historical backfill. A requested lookback earlier
    /// than `today - max_lookback` is truncated (and the truncation is
    /// reported to the caller, never hidden).
    #[serde(
        default = "default_max_lookback",
        deserialize_with = "deserialize_duration"
    )]
    pub max_lookback: std::time::Duration,

    /// Window size used when a provider does not declare its own maximum.
    pub default_window_days: u32,

    /// Upper bound on concurrently syncing accounts within one run.
    pub max_concurrent_accounts: usize,

    /// Per-account provider fetch timeout. Timing out one account skips it
    /// without affecting siblings.
    #[serde(
        default = "default_fetch_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub fetch_timeout: std::time::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_lookback: default_max_lookback(),
            default_window_days: default_window_days(),
            max_concurrent_accounts: default_max_concurrent_accounts(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Currency assumed for providers that omit one (e.g., "USD").
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Sync engine settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_currency: default_currency(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
