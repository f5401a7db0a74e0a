//! # Kiln Core Configuration Errors
//!
//! Defines [`ConfigError`], raised while resolving the configuration snapshot
//! or interpreting operator-supplied arguments. Any of these stops the run
//! before the first stage starts.
use std::path::PathBuf;
use thiserror::Error;

use crate::kernel::exit_code;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Installation root is not set or is empty")]
    MissingInstallRoot,

    #[error("Setting '{key}' must be an absolute path, got '{}'", path.display())]
    RelativePath { key: &'static str, path: PathBuf },

    #[error("Configuration file not found: {}", .0.display())]
    ConfigFileNotFound(PathBuf),

    #[error("Unsupported configuration format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Failed to parse {format} configuration '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue { key: String, value: String, reason: String },

    #[error("Unknown stage '{0}' (expected one of: provision, install-runtime, build-artifact, validate, package)")]
    UnknownStage(String),

    #[error("I/O error reading configuration '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn exit_code(&self) -> u8 {
        exit_code::USAGE
    }
}
