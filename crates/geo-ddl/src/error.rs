//! Error types for the spatial DDL library.

use thiserror::Error;

/// Main error type for spatial DDL operations.
#[derive(Error, Debug)]
pub enum GeoDdlError {
    /// Invalid argument or argument combination, detected before any SQL is emitted
    #[error("Argument error: {0}")]
    Argument(String),

    /// Malformed extended geometry or raster payload (bad EWKT/EWKB header, truncated hex, etc.)
    #[error("Decode error: {0}")]
    Decode(String),

    /// An optional dependency is required for this code path but is not available
    #[error("Missing optional dependency `{name}`: {hint}")]
    MissingDependency { name: String, hint: String },

    /// Runtime environment problem (missing env var, library path, etc.)
    #[error("Environment error: {0}")]
    Environment(String),

    /// Invalid engine or connection-URL configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error propagated from the underlying database driver
    #[error("Database error: {0}")]
    Database(String),
}

impl GeoDdlError {
    /// Create an Argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        GeoDdlError::Argument(message.into())
    }

    /// Create a Decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        GeoDdlError::Decode(message.into())
    }

    /// Create a MissingDependency error with an installation hint.
    pub fn missing_dependency(name: impl Into<String>, hint: impl Into<String>) -> Self {
        GeoDdlError::MissingDependency {
            name: name.into(),
            hint: hint.into(),
        }
    }

    /// Create a Database error.
    pub fn database(message: impl Into<String>) -> Self {
        GeoDdlError::Database(message.into())
    }
}

/// Result type alias for spatial DDL operations.
pub type Result<T> = std::result::Result<T, GeoDdlError>;
