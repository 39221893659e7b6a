//! Persistence for tunables (config) and runtime state.
//!
//! - **Config** (`config.json`): timing constants, read from the platform config directory.
//! - **State** (`state.json`): tab records and the display preference, saved to the
//!   platform data directory.
//!
//! On macOS both resolve to `~/Library/Application Support/watchleft/`.

use crate::DurationRecord;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Timing tunables (persisted to config.json).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How often a ready page pushes its extraction
    pub report_interval_ms: u64,
    /// Delay before pulling a tab whose navigation just completed
    pub pull_delay_ms: u64,
    /// Spacing between pulls of a tab that still reports loading
    pub retry_delay_ms: u64,
    /// Extra pulls after the first one while the tab keeps loading
    pub max_retries: u32,
    /// Settle time after in-page navigation before re-resolving
    pub navigation_grace_ms: u64,
    /// Persistence throttle window
    pub persist_window_ms: u64,
    /// Interval between bulk reconciliation sweeps
    pub sweep_interval_ms: u64,
    /// How long the daemon waits for a page to answer a pull
    pub pull_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            report_interval_ms: 5_000,
            pull_delay_ms: 1_500,
            retry_delay_ms: 2_000,
            max_retries: 2,
            navigation_grace_ms: 1_000,
            persist_window_ms: 1_000,
            sweep_interval_ms: 60_000,
            pull_timeout_ms: 5_000,
        }
    }
}

impl Config {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }

    pub fn pull_delay(&self) -> Duration {
        Duration::from_millis(self.pull_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn navigation_grace(&self) -> Duration {
        Duration::from_millis(self.navigation_grace_ms)
    }

    pub fn persist_window(&self) -> Duration {
        Duration::from_millis(self.persist_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Runtime state (persisted to state.json).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// Last-known record of every tracked tab
    #[serde(default, deserialize_with = "lenient_records")]
    pub records: Vec<DurationRecord>,
    /// Whether the badge shows the total
    #[serde(default = "default_display_enabled", alias = "display_enabled")]
    pub display_enabled: bool,
}

fn default_display_enabled() -> bool {
    true
}

impl Default for State {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            display_enabled: default_display_enabled(),
        }
    }
}

/// Accept anything for `records`: a non-array becomes empty and entries that
/// fail to parse are skipped.
fn lenient_records<'de, D>(deserializer: D) -> Result<Vec<DurationRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

/// Config directory (e.g. `~/.config/watchleft/`).
fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("watchleft"))
}

/// Data directory (e.g. `~/.local/share/watchleft/`).
fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("watchleft"))
}

/// Default location of state.json.
pub fn state_path() -> Option<PathBuf> {
    data_dir().map(|d| d.join("state.json"))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from disk, returning defaults if the file is missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_dir().map(|d| d.join("config.json")) else {
        return Config::default();
    };
    load_config_from(&path)
}

// ---------------------------------------------------------------------------
// Path-parameterised helpers (used by the store and tests)
// ---------------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

pub fn load_state_from(path: &Path) -> State {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => State::default(),
    }
}

pub fn save_state_to(state: &State, path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write bytes to a file atomically: write to a temp file in the same
/// directory, then rename over the target. Prevents partial JSON on crash.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
