use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::ArchiveProvisioner;
use crate::command::{CommandOutput, CommandRunner, CommandSpec, LogSink, OutputSink};
use crate::config::ConfigSnapshot;
use crate::stage_manager::error::StageError;

/// Execution mode for stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Live mode - actually execute operations
    Live,
    /// Dry run mode - report what would happen without checking or acting
    DryRun,
}

impl ExecutionMode {
    /// Check if this is dry run mode
    pub fn is_dry_run(&self) -> bool {
        matches!(self, ExecutionMode::DryRun)
    }
}

/// Everything a stage may use. Shared read-only by every stage of a run.
#[derive(Clone)]
pub struct StageContext {
    /// The execution mode
    pub mode: ExecutionMode,
    config: Arc<ConfigSnapshot>,
    runner: CommandRunner,
    provisioner: ArchiveProvisioner,
    sink: Arc<dyn OutputSink>,
    /// `PATH` captured when the run started
    search_path: Option<String>,
}

impl StageContext {
    /// Create a new context in live mode
    pub fn new(config: Arc<ConfigSnapshot>, runner: CommandRunner, provisioner: ArchiveProvisioner) -> Self {
        Self {
            mode: ExecutionMode::Live,
            config,
            runner,
            provisioner,
            sink: Arc::new(LogSink),
            search_path: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Where child output is streamed
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The `PATH` tool lookups and child processes start from
    pub fn with_search_path(mut self, path: Option<String>) -> Self {
        self.search_path = path;
        self
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn provisioner(&self) -> &ArchiveProvisioner {
        &self.provisioner
    }

    pub fn search_path(&self) -> Option<&str> {
        self.search_path.as_deref()
    }

    /// Check if dry run mode is active
    pub fn is_dry_run(&self) -> bool {
        self.mode.is_dry_run()
    }

    /// Locate a host tool on the captured `PATH`
    pub fn probe(&self, program: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(path) => which::which_in(program, Some(path), &self.config.workspace).ok(),
            None => CommandRunner::probe(program),
        }
    }

    /// Environment for commands that use the ROCm toolchain
    pub fn toolchain_env(&self) -> Vec<(String, String)> {
        self.config.toolchain_env(self.search_path())
    }

    /// Run a command; a non-zero exit is returned, not raised
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, StageError> {
        let spec = match &self.search_path {
            Some(path) if !has_env(spec, "PATH") => spec.clone().env("PATH", path.clone()),
            _ => spec.clone(),
        };
        Ok(self.runner.run(&spec, self.sink.as_ref()).await?)
    }

    /// Run a command that must succeed
    pub async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, StageError> {
        let output = self.run(spec).await?;
        if output.timed_out {
            return Err(StageError::CommandTimedOut {
                label: spec.get_label().to_string(),
                timeout: spec.get_timeout().unwrap_or_default(),
                diagnostics: output.diagnostics(),
            });
        }
        if !output.success() {
            return Err(StageError::CommandFailed {
                label: spec.get_label().to_string(),
                exit_code: output.exit_code,
                diagnostics: output.diagnostics(),
            });
        }
        Ok(output)
    }
}

fn has_env(spec: &CommandSpec, key: &str) -> bool {
    spec.get_env().iter().any(|(k, _)| k == key)
}
