//! # Kiln Core Stage Errors
//!
//! Defines [`StageError`], the failure type of every stage check and action.
//!
//! Component errors (commands, downloads, installation records,
//! configuration) are wrapped as-is so the original cause survives into the
//! run report. The remaining variants classify outcomes that only make sense
//! at stage level, such as a command exiting non-zero or a missing toolchain.
//! Each variant maps to a distinct process exit code.
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::archive::ProvisionError;
use crate::command::CommandError;
use crate::config::ConfigError;
use crate::install::InstallError;
use crate::kernel::exit_code;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("'{label}' failed with exit code {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none (killed)".to_string()))]
    CommandFailed {
        label: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("'{label}' timed out after {timeout:?}")]
    CommandTimedOut {
        label: String,
        timeout: Duration,
        diagnostics: String,
    },

    #[error("Required host tool '{tool}' not found on PATH")]
    HostToolMissing { tool: String },

    #[error("Toolchain incomplete, missing: {}", missing.join(", "))]
    ToolchainMissing { missing: Vec<String> },

    #[error("Verification failed: {reason}")]
    VerificationFailed { reason: String, diagnostics: String },

    #[error("Installation failed: {reason}")]
    InstallFailed { reason: String, diagnostics: String },

    #[error("Build outputs missing in '{}'; run build-artifact without --install first", path.display())]
    BuildArtifactsMissing { path: PathBuf },

    #[error("Validation {what} not found: {}", path.display())]
    ValidationInputMissing { what: &'static str, path: PathBuf },

    #[error("Provisioning declined by operator")]
    ProvisionDeclined,

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StageError::Command(e) => e.exit_code(),
            StageError::Provision(e) => e.exit_code(),
            StageError::Install(e) => e.exit_code(),
            StageError::Config(e) => e.exit_code(),
            StageError::CommandFailed { .. } => exit_code::GENERAL,
            StageError::CommandTimedOut { .. } => exit_code::TIMED_OUT,
            StageError::HostToolMissing { .. } => exit_code::HOST_TOOL_MISSING,
            StageError::ToolchainMissing { .. } => exit_code::TOOLCHAIN_MISSING,
            StageError::VerificationFailed { .. } | StageError::InstallFailed { .. } => exit_code::VERIFICATION_FAILED,
            StageError::BuildArtifactsMissing { .. } => exit_code::ARTIFACTS_MISSING,
            StageError::ValidationInputMissing { .. } => exit_code::USAGE,
            StageError::ProvisionDeclined => exit_code::GENERAL,
            StageError::Io { .. } => exit_code::GENERAL,
        }
    }

    /// Bounded output tail of the command behind this failure, if any
    pub fn diagnostics(&self) -> Option<&str> {
        let text = match self {
            StageError::CommandFailed { diagnostics, .. }
            | StageError::CommandTimedOut { diagnostics, .. }
            | StageError::VerificationFailed { diagnostics, .. }
            | StageError::InstallFailed { diagnostics, .. } => diagnostics.as_str(),
            _ => return None,
        };
        Some(text).filter(|t| !t.is_empty())
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StageError::Io { path, source }
    }
}
