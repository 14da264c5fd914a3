//! Configuration module for x2cscope
//!
//! Settings are read from a TOML file. Missing sections and fields fall back
//! to their defaults.
//!
//! # Config Location
//!
//! [`Config::load_or_default`] looks for `x2cscope.toml` in the platform
//! configuration directory:
//! - **Linux**: `~/.config/x2cscope/`
//! - **macOS**: `~/Library/Application Support/x2cscope/`
//! - **Windows**: `%APPDATA%\x2cscope\`
//!
//! # Example
//!
//! ```toml
//! [resolver]
//! max_depth = 8
//!
//! [resolver.legacy_dump]
//! tool = "/opt/microchip/xc16/bin/xc16-readelf"
//!
//! [scope]
//! max_chunk_size = 128
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, X2cError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "x2cscope";

/// Config filename
pub const CONFIG_FILE: &str = "x2cscope.toml";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub scope: ScopeConfig,
    pub logging: LogConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| X2cError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            X2cError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| X2cError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.scope.max_chunk_size == 0 {
            return Err(X2cError::Config("scope.max_chunk_size must be > 0".into()));
        }
        if self.scope.max_channels == 0 {
            return Err(X2cError::Config("scope.max_channels must be > 0".into()));
        }
        if self.resolver.max_depth == 0 {
            return Err(X2cError::Config("resolver.max_depth must be > 0".into()));
        }
        Ok(())
    }
}
