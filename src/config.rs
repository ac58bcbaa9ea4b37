//! Configuration management for udma-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (UDMA_EMU_ENGINES, UDMA_EMU_TIMING, UDMA_EMU_DM2)
//! 2. Project-local config file (`./udma-emu.toml`)
//! 3. User config file (`~/.config/udma-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # udma-emu.toml
//!
//! # Engines to create, one per hardware thread (at most 8)
//! num_engines = 2
//!
//! # Model instruction latency
//! timing = true
//!
//! # Initial DM2 mode register
//! dm2 = 0x2A0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::device::dma::{ChunkLimits, Dm2Config, EngineConfig, DESC_TRACKER_CAPACITY, MAX_ENGINES};

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Values a configuration may not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("num_engines must be between 1 and {max}, got {got}")]
    EngineCount { got: usize, max: usize },
    #[error("tracker_capacity must be at least 1")]
    TrackerCapacity,
    #[error("{name} must be a power of two between 1 and 256, got {got}")]
    ChunkSize { name: &'static str, got: u32 },
}

/// udma-emu configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Number of engines (one per hardware thread).
    pub num_engines: Option<usize>,

    /// Model instruction latency.
    pub timing: Option<bool>,

    /// Initial DM2 value.
    pub dm2: Option<u32>,

    /// Completion tracker slots per engine.
    pub tracker_capacity: Option<usize>,

    /// Largest chunk for a side that bypasses the cache.
    pub bypass_chunk: Option<u32>,

    /// Largest chunk for a side that goes through the cache.
    pub cached_chunk: Option<u32>,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    pub fn num_engines(&self) -> usize {
        self.num_engines.unwrap_or(1)
    }

    pub fn timing(&self) -> bool {
        self.timing.unwrap_or(false)
    }

    pub fn dm2(&self) -> Dm2Config {
        self.dm2.map(Dm2Config).unwrap_or(Dm2Config::RESET)
    }

    pub fn tracker_capacity(&self) -> usize {
        self.tracker_capacity.unwrap_or(DESC_TRACKER_CAPACITY)
    }

    pub fn chunk_limits(&self) -> ChunkLimits {
        let defaults = ChunkLimits::default();
        ChunkLimits {
            bypass: self.bypass_chunk.unwrap_or(defaults.bypass),
            cached: self.cached_chunk.unwrap_or(defaults.cached),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engines = self.num_engines();
        if engines == 0 || engines > MAX_ENGINES {
            return Err(ConfigError::EngineCount { got: engines, max: MAX_ENGINES });
        }
        if self.tracker_capacity() == 0 {
            return Err(ConfigError::TrackerCapacity);
        }
        let limits = self.chunk_limits();
        for (name, got) in [("bypass_chunk", limits.bypass), ("cached_chunk", limits.cached)] {
            if !got.is_power_of_two() || got > 256 {
                return Err(ConfigError::ChunkSize { name, got });
            }
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            timing: self.timing(),
            dm2: self.dm2(),
            tracker_capacity: self.tracker_capacity(),
            limits: self.chunk_limits(),
            ..Default::default()
        }
    }

    /// Load user configuration from ~/.config/udma-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./udma-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("udma-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        // Try to find project root by looking for Cargo.toml
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("udma-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.num_engines.is_some() {
            self.num_engines = other.num_engines;
        }
        if other.timing.is_some() {
            self.timing = other.timing;
        }
        if other.dm2.is_some() {
            self.dm2 = other.dm2;
        }
        if other.tracker_capacity.is_some() {
            self.tracker_capacity = other.tracker_capacity;
        }
        if other.bypass_chunk.is_some() {
            self.bypass_chunk = other.bypass_chunk;
        }
        if other.cached_chunk.is_some() {
            self.cached_chunk = other.cached_chunk;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("UDMA_EMU_ENGINES") {
            match value.trim().parse() {
                Ok(n) => {
                    log::info!("Using UDMA_EMU_ENGINES from environment: {}", n);
                    self.num_engines = Some(n);
                }
                Err(e) => log::warn!("Ignoring UDMA_EMU_ENGINES={:?}: {}", value, e),
            }
        }
        if let Ok(value) = std::env::var("UDMA_EMU_TIMING") {
            let on = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes");
            log::info!("Using UDMA_EMU_TIMING from environment: {}", on);
            self.timing = Some(on);
        }
        if let Ok(value) = std::env::var("UDMA_EMU_DM2") {
            match parse_u32(&value) {
                Some(dm2) => {
                    log::info!("Using UDMA_EMU_DM2 from environment: 0x{:x}", dm2);
                    self.dm2 = Some(dm2);
                }
                None => log::warn!("Ignoring UDMA_EMU_DM2={:?}: not a number", value),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("udma-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# udma-emu configuration
# Place this file at ~/.config/udma-emu/config.toml or ./udma-emu.toml

# Engines to create, one per hardware thread (1..=8)
num_engines = 1

# Model instruction latency (poll 20, wait 24, others 20 cycles)
timing = false

# Initial DM2 mode register (reset value 0x2A0)
# dm2 = 0x2A0

# Completion tracker slots per engine
# tracker_capacity = 256

# Chunk limits in bytes (powers of two)
# bypass_chunk = 256
# cached_chunk = 128
"#
        .to_string()
    }
}

/// Parse a decimal or `0x`-prefixed hex number.
pub fn parse_u32(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => text.replace('_', "").parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.num_engines(), 1);
        assert!(!config.timing());
        assert_eq!(config.dm2(), Dm2Config::RESET);
        assert_eq!(config.tracker_capacity(), 256);
        assert_eq!(config.chunk_limits(), ChunkLimits { bypass: 256, cached: 128 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config { num_engines: Some(2), timing: Some(true), ..Default::default() };
        let overlay = Config { timing: Some(false), dm2: Some(0x2A1), ..Default::default() };

        base.merge(overlay);

        // num_engines unchanged (overlay was None)
        assert_eq!(base.num_engines, Some(2));
        assert_eq!(base.timing, Some(false));
        assert_eq!(base.dm2, Some(0x2A1));
    }

    #[test]
    fn test_validate() {
        let config = Config { num_engines: Some(9), ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::EngineCount { got: 9, max: 8 }));

        let config = Config { cached_chunk: Some(96), ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::ChunkSize { name: "cached_chunk", got: 96 }));

        let config = Config { tracker_capacity: Some(0), ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::TrackerCapacity));
    }

    #[test]
    fn test_engine_config() {
        let config = Config {
            timing: Some(true),
            dm2: Some(0x0A0),
            bypass_chunk: Some(64),
            ..Default::default()
        };
        let engine = config.engine_config();
        assert!(engine.timing);
        assert!(!engine.dm2.error_exception_enabled());
        assert_eq!(engine.limits.bypass, 64);
        assert_eq!(engine.limits.cached, 128);
        assert_eq!(engine.latency.wait, 24);
    }

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32("0x2A0"), Some(0x2A0));
        assert_eq!(parse_u32(" 672 "), Some(672));
        assert_eq!(parse_u32("0x1000_0000"), Some(0x1000_0000));
        assert_eq!(parse_u32("zz"), None);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.num_engines, Some(1));
        assert!(config.validate().is_ok());
    }
}
