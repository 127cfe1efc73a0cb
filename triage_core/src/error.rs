//! Error types for the triage_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for triage_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed protocol or screener definitions
    #[error("Catalog validation error: {0}")]
    CatalogValidation(String),

    /// Protocol id not present in the catalog
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Screener id not present in the catalog
    #[error("Unknown screener: {0}")]
    UnknownScreener(String),

    /// Screener completed before every required answer was given
    #[error("Screener {0} is not complete")]
    IncompleteScreener(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
