//! Configuration sections
//!
//! Every field has a default so a partial TOML file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default bound on structure nesting while flattening
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Default bound on unrolled elements of an array of structures
pub const DEFAULT_MAX_ARRAY_UNROLL: usize = 256;

/// Largest chunk the serial protocol carries in one frame
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 253;

/// Channels supported by the on-device scope
pub const DEFAULT_MAX_CHANNELS: usize = 8;

/// Debug-info resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Structure nesting beyond this depth is not flattened
    pub max_depth: usize,
    /// Arrays of structures unroll at most this many elements
    pub max_array_unroll: usize,
    /// Fall back to the ELF symbol table for variables without a location
    pub symbol_fallback: bool,
    /// External dump tool used for 16-bit targets
    pub legacy_dump: LegacyDumpConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_array_unroll: DEFAULT_MAX_ARRAY_UNROLL,
            symbol_fallback: true,
            legacy_dump: LegacyDumpConfig::default(),
        }
    }
}

/// How to invoke the external debug-info dump tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyDumpConfig {
    /// Use the dump tool for 2-byte address targets
    pub enabled: bool,
    /// Executable name or path
    pub tool: PathBuf,
    /// Arguments placed before the ELF path
    pub args: Vec<String>,
}

impl Default for LegacyDumpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool: PathBuf::from("xc16-readelf"),
            args: vec!["-w".to_string()],
        }
    }
}

/// Scope acquisition settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Upper bound on one chunked buffer read
    pub max_chunk_size: usize,
    /// Channels accepted by `add_channel`
    pub max_channels: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_channels: DEFAULT_MAX_CHANNELS,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,x2cscope=debug".to_string(),
            file: None,
        }
    }
}
