//! Configuration loading and resolution
//!
//! The engine takes an explicit `PlayerConfig` at construction; there is no
//! ambient global configuration. File resolution follows the priority order:
//! 1. Explicit path (highest priority, usually a command-line argument)
//! 2. `BAGDECK_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/bagdeck/config.toml`)
//! 4. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file to load
pub const CONFIG_ENV_VAR: &str = "BAGDECK_CONFIG";

/// Tunable parameters for one player instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Duration of one cache block in nanoseconds
    pub block_duration_nanos: u64,

    /// Byte budget for the block cache; least-recently-queried blocks are
    /// evicted once the total exceeds this
    pub cache_budget_bytes: u64,

    /// Ceiling on cumulative message bytes in a single emitted frame.
    /// When the nominal time advance would exceed it, the advance shrinks
    /// and more frames are delivered instead of dropping messages.
    pub frame_bytes_cap: u64,

    /// Pin window behind the playhead; blocks inside it are never evicted
    pub look_behind_nanos: u64,

    /// Pin window ahead of the playhead; blocks inside it are never evicted
    pub look_ahead_nanos: u64,

    /// Target interval between playback ticks in milliseconds
    pub tick_interval_ms: u64,

    /// Ceiling on virtual-time advance per tick in nanoseconds, independent
    /// of playback speed. Bounds catch-up after a stall.
    pub max_advance_nanos: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            block_duration_nanos: 1_000_000_000,       // 1 s blocks
            cache_budget_bytes: 1024 * 1024 * 1024,    // 1 GiB
            frame_bytes_cap: 64 * 1024 * 1024,         // 64 MiB per frame
            look_behind_nanos: 5_000_000_000,          // 5 s
            look_ahead_nanos: 15_000_000_000,          // 15 s
            tick_interval_ms: 50,
            max_advance_nanos: 1_000_000_000, // 1 s of recording time per tick
        }
    }
}

impl PlayerConfig {
    /// Load configuration following the documented priority order
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(PlayerConfig::default())
    }

    /// Parse a TOML config file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: PlayerConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.block_duration_nanos == 0 {
            return Err(Error::Config("block_duration_nanos must be > 0".into()));
        }
        if self.cache_budget_bytes == 0 {
            return Err(Error::Config("cache_budget_bytes must be > 0".into()));
        }
        if self.frame_bytes_cap == 0 {
            return Err(Error::Config("frame_bytes_cap must be > 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be > 0".into()));
        }
        if self.max_advance_nanos == 0 {
            return Err(Error::Config("max_advance_nanos must be > 0".into()));
        }
        Ok(())
    }
}

/// Platform default config file path, if a config directory exists
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bagdeck").join("config.toml"))
}
