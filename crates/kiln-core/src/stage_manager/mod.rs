//! # Kiln Core Stage Manager
//!
//! The provisioning state machine.
//!
//! - [`Stage`]: one idempotent unit of work with a readiness check and an
//!   action. The five built-in stages live in [`core_stages`].
//! - [`StageExecutor`]: Check, Backup, Act, then Commit or Restore for a
//!   single stage.
//! - [`StagePipeline`]: runs stages in their fixed order, stops at the first
//!   required failure and supports resuming from a named stage.
pub mod context;
pub mod core_stages;
pub mod error;
pub mod executor;
pub mod pipeline;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConfigError;
use crate::kernel::exit_code;

/// The provisioning stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Provision,
    InstallRuntime,
    BuildArtifact,
    Validate,
    Package,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Provision,
        StageKind::InstallRuntime,
        StageKind::BuildArtifact,
        StageKind::Validate,
        StageKind::Package,
    ];

    /// Position in the pipeline
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Name used on the command line
    pub fn cli_name(&self) -> &'static str {
        match self {
            StageKind::Provision => "provision",
            StageKind::InstallRuntime => "install-runtime",
            StageKind::BuildArtifact => "build-artifact",
            StageKind::Validate => "validate",
            StageKind::Package => "package",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cli_name())
    }
}

impl FromStr for StageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.cli_name() == s)
            .ok_or_else(|| ConfigError::UnknownStage(s.to_string()))
    }
}

/// Outcome of a stage's idempotency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The stage has work to do
    Pending,
    /// The desired state is already present; skipped unless forced
    Satisfied(String),
    /// The stage does not apply to this run; skipped even when forced
    NotApplicable(String),
}

/// Core trait that all stages must implement
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// The human-readable name of the stage
    fn name(&self) -> &str {
        self.kind().cli_name()
    }

    /// The description of what this stage does
    fn description(&self) -> &str;

    /// Optional stages record failures without halting the pipeline
    fn is_optional(&self) -> bool {
        false
    }

    /// Path this stage replaces, backed up by the executor before acting
    fn canonical_path(&self, _context: &StageContext) -> Option<PathBuf> {
        None
    }

    /// Idempotency check. Must not have side effects.
    async fn check(&self, context: &StageContext) -> Result<Readiness, StageError>;

    /// Perform the stage's action
    async fn execute(&self, context: &StageContext) -> Result<(), StageError>;

    /// Generate a description of what this stage would do in dry run mode
    fn dry_run_description(&self, _context: &StageContext) -> String {
        format!("Would execute stage: {}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Skipped => write!(f, "skipped"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a stage execution
#[derive(Debug)]
pub struct StageResult {
    pub stage: String,
    pub kind: StageKind,
    pub status: StageStatus,
    pub duration: Duration,
    /// Why the stage was skipped, when it was
    pub reason: Option<String>,
    /// The underlying failure, when it failed
    pub error: Option<StageError>,
    pub optional: bool,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    pub fn skipped(&self) -> bool {
        self.status == StageStatus::Skipped
    }

    pub fn failed(&self) -> bool {
        self.status == StageStatus::Failed
    }

    pub fn exit_code(&self) -> u8 {
        match &self.error {
            Some(e) => e.exit_code(),
            None => exit_code::SUCCESS,
        }
    }
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} {:<9} {:>8.1?}", self.stage, self.status, self.duration)?;
        if let Some(reason) = &self.reason {
            write!(f, "  {}", reason)?;
        }
        if let Some(error) = &self.error {
            write!(f, "  {}", error)?;
            if self.optional {
                write!(f, " (optional)")?;
            }
        }
        Ok(())
    }
}

// Re-export important types
pub use context::{ExecutionMode, StageContext};
pub use core_stages::{StageOptions, default_stages};
pub use error::StageError;
pub use executor::StageExecutor;
pub use pipeline::{PipelineResult, PipelineStatus, StagePipeline};

// Test module declaration
#[cfg(test)]
pub(crate) mod tests;
