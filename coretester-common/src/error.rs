//! Error types shared by the coretester crates

use thiserror::Error;

/// Errors raised while building or loading configuration and identifiers.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed identifier (PLMN digits, MSIN, GUTI, ...).
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// File I/O errors while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}
