pub mod archive;
pub mod command;
pub mod config;
pub mod install;
pub mod kernel;
pub mod stage_manager;
pub mod utils;

// Re-export key public types for the binary
pub use archive::{ArchiveProvisioner, HttpClient, ReqwestClient, SourceSpec};
pub use command::{CancelSignal, CommandRunner};
pub use config::{ConfigFile, ConfigSnapshot, PartialConfig, resolve};
pub use install::{InstallationRecord, RecordState, VersionMarker};
pub use kernel::error::Error as KernelError;
pub use stage_manager::{
    ExecutionMode, PipelineResult, Readiness, Stage, StageContext, StageExecutor, StageKind, StagePipeline,
    StageResult,
};

#[cfg(test)]
mod tests;
