//! # Kiln Core Kernel Errors
//!
//! Defines the crate-wide [`Error`] aggregate and the process exit codes
//! every failure maps to.
//!
//! Each subsystem owns its own error enum (`config::error`, `command::error`,
//! `archive::error`, `install::error`, `stage_manager::error`); this module
//! only gathers them so callers at the edge (the CLI) can treat every failure
//! uniformly and translate it into a distinct exit status.
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::archive::error::ProvisionError;
use crate::command::error::CommandError;
use crate::config::error::ConfigError;
use crate::install::error::InstallError;
use crate::stage_manager::error::StageError;

/// Process exit codes, one per failure class.
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    /// Operator declined, restore without archive, or a command exited non-zero
    pub const GENERAL: u8 = 1;
    /// Bad arguments, bad configuration, or missing validate inputs
    pub const USAGE: u8 = 2;
    /// A required host tool or executable is missing
    pub const HOST_TOOL_MISSING: u8 = 3;
    pub const TOOLCHAIN_MISSING: u8 = 4;
    pub const DOWNLOAD_FAILED: u8 = 5;
    /// Post-install verification or artifact installation failed
    pub const VERIFICATION_FAILED: u8 = 6;
    pub const ARTIFACTS_MISSING: u8 = 7;
    pub const BACKUP_FAILED: u8 = 8;
    /// Automatic recovery is no longer safe; needs an operator
    pub const RESTORE_FAILED: u8 = 9;
    pub const TIMED_OUT: u8 = 124;
    pub const INTERRUPTED: u8 = 130;
}

/// Custom error type for the kiln engine
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Archive provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Installation error: {0}")]
    Install(#[from] InstallError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl Error {
    /// Exit status the CLI should terminate with for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(e) => e.exit_code(),
            Error::Command(e) => e.exit_code(),
            Error::Provision(e) => e.exit_code(),
            Error::Install(e) => e.exit_code(),
            Error::Stage(e) => e.exit_code(),
            Error::Other(_) => exit_code::GENERAL,
        }
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}
