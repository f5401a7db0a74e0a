use std::fmt;

use crate::kernel::exit_code;
use crate::stage_manager::{
    Readiness, Stage, StageContext, StageError, StageExecutor, StageKind, StageResult, StageStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Succeeded => write!(f, "succeeded"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The run log of one pipeline execution
#[derive(Debug)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub results: Vec<StageResult>,
}

impl PipelineResult {
    /// The failure that halted the run
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| r.failed() && !r.optional)
    }

    /// Optional stages that failed without halting the run
    pub fn optional_failures(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(|r| r.failed() && r.optional)
    }

    pub fn exit_code(&self) -> u8 {
        match self.first_failure() {
            Some(failure) => failure.exit_code(),
            None => exit_code::SUCCESS,
        }
    }

    /// Whether a stage of `kind` was attempted (not skipped by resume)
    pub fn attempted(&self, kind: StageKind) -> bool {
        self.results
            .iter()
            .any(|r| r.kind == kind && r.reason.as_deref() != Some(RESUME_REASON))
    }
}

const RESUME_REASON: &str = "resume";

/// Stage execution pipeline.
///
/// Stages run strictly one after another in ordinal order.
pub struct StagePipeline;

impl StagePipeline {
    /// Run `stages`, skipping those ordered before `from` without checking them
    pub async fn run(context: &StageContext, stages: &[Box<dyn Stage>], from: Option<StageKind>) -> PipelineResult {
        let mut ordered: Vec<&dyn Stage> = stages.iter().map(|s| s.as_ref()).collect();
        ordered.sort_by_key(|s| s.kind().ordinal());

        let mut results = Vec::with_capacity(ordered.len());
        for stage in ordered {
            if let Some(from) = from {
                if stage.kind().ordinal() < from.ordinal() {
                    log::info!("{}: skipped (resuming from {})", stage.name(), from);
                    results.push(StageResult {
                        stage: stage.name().to_string(),
                        kind: stage.kind(),
                        status: StageStatus::Skipped,
                        duration: Default::default(),
                        reason: Some(RESUME_REASON.to_string()),
                        error: None,
                        optional: stage.is_optional(),
                    });
                    continue;
                }
            }

            let result = StageExecutor::execute(stage, context).await;
            let halt = result.failed() && !result.optional;
            if result.failed() && result.optional {
                log::warn!("{} failed but is optional, continuing", result.stage);
            }
            results.push(result);
            if halt {
                return PipelineResult { status: PipelineStatus::Failed, results };
            }
        }

        PipelineResult { status: PipelineStatus::Succeeded, results }
    }

    /// Evaluate every stage's check without acting
    pub async fn inspect(
        context: &StageContext,
        stages: &[Box<dyn Stage>],
    ) -> Vec<(StageKind, String, Result<Readiness, StageError>)> {
        let mut report = Vec::with_capacity(stages.len());
        for stage in stages {
            report.push((stage.kind(), stage.name().to_string(), stage.check(context).await));
        }
        report.sort_by_key(|(kind, _, _)| kind.ordinal());
        report
    }
}
