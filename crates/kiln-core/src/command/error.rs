//! # Kiln Core Command Errors
//!
//! Failures to run a child process at all. A child that runs and exits
//! non-zero is not an error at this level; callers inspect
//! [`CommandOutput`](super::CommandOutput) and decide.
use std::io;
use thiserror::Error;

use crate::kernel::exit_code;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Executable not found: {program}")]
    ExecutableNotFound { program: String },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed while waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Interrupted while running '{program}'")]
    Interrupted { program: String },
}

impl CommandError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CommandError::ExecutableNotFound { .. } => exit_code::HOST_TOOL_MISSING,
            CommandError::Spawn { .. } | CommandError::Wait { .. } => exit_code::GENERAL,
            CommandError::Interrupted { .. } => exit_code::INTERRUPTED,
        }
    }
}
