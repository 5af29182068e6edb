//! Core error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// All of these are recoverable: a malformed configuration is reported to
/// the caller rather than aborting the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or JSON for [`crate::Config`]
    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    /// A field parsed but violates a configuration rule
    #[error("Invalid configuration field '{field}': {reason}")]
    Invalid { field: String, reason: String },
}
