//! Error handling for x2cscope
//!
//! This module defines the crate error type, a Result alias, and the opaque
//! transport error that link implementations hand back to the core.

use thiserror::Error;

/// Opaque failure reported by a [`Link`](crate::link::Link) implementation.
///
/// The core never inspects or retries these; they are surfaced to the caller
/// exactly as the transport produced them.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct LinkError(#[from] anyhow::Error);

impl LinkError {
    /// Create a link error from a plain message
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        LinkError(anyhow::Error::msg(message))
    }

    /// Wrap any error type produced by a transport
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LinkError(anyhow::Error::new(error))
    }

    /// Borrow the underlying error
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

/// Main error type for x2cscope operations
#[derive(Error, Debug)]
pub enum X2cError {
    /// The ELF file is missing, corrupt, or carries no debug information
    #[error("ELF load error: {0}")]
    ElfLoad(String),

    /// The external debug-info dump tool could not be started
    #[error("Dump tool not found: {tool}")]
    DumpToolMissing { tool: String },

    /// A type chain could not be followed to a supported end type
    #[error("Unresolved type for '{name}': {reason}")]
    UnresolvedType { name: String, reason: String },

    /// The primitive type name has no marshalling representation
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// A write value lies outside the representable bound
    #[error("Value {value} out of range [{min}, {max}]")]
    Range {
        value: String,
        min: String,
        max: String,
    },

    /// The transport returned an unexpected number of bytes
    #[error("Size mismatch at address 0x{address:08X}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        address: u64,
        expected: usize,
        actual: usize,
    },

    /// Transport failure, passed through unchanged
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The variable is already a scope channel
    #[error("Channel already exists: {0}")]
    ChannelExists(String),

    /// No scope channel with that name
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// The device supports no more channels
    #[error("Too many scope channels (limit {limit})")]
    TooManyChannels { limit: usize },

    /// The trigger configuration cannot be applied
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// No variable with that name in the current map
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// Array element access outside the array
    #[error("Index {index} out of bounds for array of {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Errors related to configuration loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<X2cError>,
    },
}

impl X2cError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        X2cError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a range error from any displayable bounds
    pub fn range(
        value: impl std::fmt::Display,
        min: impl std::fmt::Display,
        max: impl std::fmt::Display,
    ) -> Self {
        X2cError::Range {
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Strip any context wrappers and return the innermost error
    pub fn root(&self) -> &X2cError {
        match self {
            X2cError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the innermost error came from the transport
    pub fn is_link(&self) -> bool {
        matches!(self.root(), X2cError::Link(_))
    }
}

/// Result type alias for x2cscope operations
pub type Result<T> = std::result::Result<T, X2cError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, LinkError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| X2cError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| X2cError::from(e).with_context(f()))
    }
}
