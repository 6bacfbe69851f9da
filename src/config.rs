//! Imaging configuration.
//!
//! Handles loading, validating, and merging `derivo.toml`. Stock defaults are
//! the base layer; a user file in the config directory overrides any subset
//! of keys; command-line flags override last.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! quality = 75                          # JPEG quality when a spec has no qNN (1-100)
//! resample_filter = "box"               # resampling filter when a spec names none
//! anchor = "smart"                      # fill anchor when a spec names none
//! workers = 1                           # concurrent decode+transform slots
//! cache_dir = "resources/_gen/images"   # persisted derivative root
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Anchor, ResampleFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the config directory.
pub const CONFIG_FILE: &str = "derivo.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Defaults applied to every transformation, plus processor wiring.
///
/// User config files need only specify the values they want to override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagingConfig {
    /// Quality substituted for lossy output when a spec has no `qNN`.
    pub quality: u32,
    /// Resampling filter used when a spec names none.
    pub resample_filter: ResampleFilter,
    /// Crop anchor for `fill` when a spec names none.
    pub anchor: Anchor,
    /// Capacity of the concurrency throttle.
    pub workers: usize,
    /// Root of the persisted derivative tier.
    pub cache_dir: PathBuf,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            quality: 75,
            resample_filter: ResampleFilter::Box,
            anchor: Anchor::Smart,
            workers: 1,
            cache_dir: PathBuf::from("resources/_gen/images"),
        }
    }
}

impl ImagingConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Validation("quality must be 1-100".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Validation("workers must be at least 1".into()));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("cache_dir must not be empty".into()));
        }
        Ok(())
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ImagingConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `derivo.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no config file.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ImagingConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ImagingConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `derivo.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<ImagingConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `derivo.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# derivo configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# Quality (1-100) used for JPEG output when a spec has no qNN token.
# Lossless formats ignore it, and their file names never include it.
quality = 75

# Resampling filter used when a spec names none.
# One of: nearestneighbor, box, linear, catmullrom, gaussian, lanczos
resample_filter = "box"

# Crop anchor for fill when a spec names none.
# One of: center, topleft, top, topright, left, right,
#         bottomleft, bottom, bottomright, smart
anchor = "smart"

# How many decode+transform jobs may run at once. The image operations are
# already parallel internally; raising this mostly raises memory use.
workers = 1

# Where derived images are persisted, mirroring their target paths.
# Delete this directory to force every derivative to be rebuilt.
cache_dir = "resources/_gen/images"
"##
}
