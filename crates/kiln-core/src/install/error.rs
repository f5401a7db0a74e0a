//! # Kiln Core Installation Errors
//!
//! Failures while moving installed trees between their live, backup and
//! archive locations, or while reading and writing version markers.
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::kernel::exit_code;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to move '{}' aside to '{}': {source}", path.display(), backup.display())]
    BackupFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to restore '{}' from backup: {reason}. Manual intervention required", path.display())]
    BackupRestoreFailed { path: PathBuf, reason: String },

    #[error("No archived installation found at '{}'", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid version marker '{}': {reason}", path.display())]
    Marker { path: PathBuf, reason: String },
}

impl InstallError {
    pub fn exit_code(&self) -> u8 {
        match self {
            InstallError::BackupFailed { .. } => exit_code::BACKUP_FAILED,
            InstallError::BackupRestoreFailed { .. } => exit_code::RESTORE_FAILED,
            InstallError::ArchiveMissing(_) => exit_code::GENERAL,
            InstallError::Io { .. } | InstallError::Marker { .. } => exit_code::VERIFICATION_FAILED,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| InstallError::Io { path, source }
    }
}
