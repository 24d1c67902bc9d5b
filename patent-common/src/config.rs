//! Configuration management for the patent value pipeline.
//!
//! The pipeline reads an optional configuration file at `~/.patent-value/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Command-line flags (applied by the binary)
//! 2. Environment variables (PATENT_VALUE_* prefix)
//! 3. Explicit config file values
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PATENT_VALUE_GAMMA` → valuation.gamma
//! - `PATENT_VALUE_OUTPUT` → output.path
//! - `PATENT_VALUE_LOG_LEVEL` → observability.log_level
//! - `PATENT_VALUE_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".patent-value"),
        |dirs| dirs.home_dir().join(".patent-value"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Valuation model parameters
    #[serde(default)]
    pub valuation: ValuationConfig,

    /// Output destination and console preview
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Valuation Configuration
// ============================================================================

/// Parameters of the truncated-normal valuation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Signal-to-noise parameter. Informativeness is `1 - exp(-gamma)`.
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Relative tolerance used when checking that every row of a firm-day
    /// carries the same dollar value before the first row wins.
    #[serde(default = "default_mw_tolerance")]
    pub mw_tolerance: f64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            gamma: default_gamma(),
            mw_tolerance: default_mw_tolerance(),
        }
    }
}

// ============================================================================
// Output Configuration
// ============================================================================

/// Where results go and how much of them is echoed to the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination CSV for aggregated firm-day rows
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    /// Rows shown in each console preview
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            preview_rows: default_preview_rows(),
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Aliases: "level"
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    /// Aliases: "format"
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_gamma() -> f64 {
    0.007
}
fn default_mw_tolerance() -> f64 {
    1e-9
}
fn default_output_path() -> PathBuf {
    PathBuf::from("patent_value_results.csv")
}
fn default_preview_rows() -> usize {
    10
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// A value that is set but cannot be parsed is an error rather than
    /// being silently ignored, since a wrong `gamma` changes every result.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(gamma) = lookup("PATENT_VALUE_GAMMA") {
            self.valuation.gamma = gamma
                .trim()
                .parse()
                .with_context(|| format!("PATENT_VALUE_GAMMA is not a number: {gamma}"))?;
        }

        if let Some(path) = lookup("PATENT_VALUE_OUTPUT") {
            self.output.path = PathBuf::from(path);
        }

        if let Some(level) = lookup("PATENT_VALUE_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(format) = lookup("PATENT_VALUE_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        Ok(())
    }
}
