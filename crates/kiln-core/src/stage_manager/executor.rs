use std::time::Instant;

use crate::install::InstallationRecord;
use crate::stage_manager::{Readiness, Stage, StageContext, StageError, StageResult, StageStatus};

/// Drives one stage through Check, Backup, Act and Commit or Restore.
///
/// The canonical path of a stage ends every execution either fully replaced
/// or exactly as it was before.
pub struct StageExecutor;

impl StageExecutor {
    /// Execute `stage`, forcing it when the run is forced
    pub async fn execute(stage: &dyn Stage, context: &StageContext) -> StageResult {
        Self::execute_with(stage, context, context.config().force).await
    }

    pub async fn execute_with(stage: &dyn Stage, context: &StageContext, force: bool) -> StageResult {
        let started = Instant::now();

        if context.is_dry_run() {
            let description = stage.dry_run_description(context);
            log::info!("[dry-run] {}: {}", stage.name(), description);
            return finish(stage, started, StageStatus::Skipped, Some(description), None);
        }

        match stage.check(context).await {
            Err(e) => {
                log::error!("{}: check failed: {}", stage.name(), e);
                return finish(stage, started, StageStatus::Failed, None, Some(e));
            }
            Ok(Readiness::NotApplicable(reason)) => {
                log::info!("{}: skipped ({})", stage.name(), reason);
                return finish(stage, started, StageStatus::Skipped, Some(reason), None);
            }
            Ok(Readiness::Satisfied(reason)) if !force => {
                log::info!("{}: already done ({})", stage.name(), reason);
                return finish(stage, started, StageStatus::Skipped, Some(reason), None);
            }
            Ok(Readiness::Satisfied(reason)) => {
                log::info!("{}: forcing despite: {}", stage.name(), reason);
            }
            Ok(Readiness::Pending) => {}
        }

        log::info!("{}: {}", stage.name(), stage.description());
        match Self::act(stage, context).await {
            Ok(()) => {
                log::info!("{}: done in {:.1?}", stage.name(), started.elapsed());
                finish(stage, started, StageStatus::Succeeded, None, None)
            }
            Err(e) => {
                log::error!("{}: {}", stage.name(), e);
                finish(stage, started, StageStatus::Failed, None, Some(e))
            }
        }
    }

    async fn act(stage: &dyn Stage, context: &StageContext) -> Result<(), StageError> {
        let guard = match stage.canonical_path(context) {
            Some(path) => {
                let record = InstallationRecord::new(path);
                record.recover()?;
                Some(record.begin_replace()?)
            }
            None => None,
        };

        match stage.execute(context).await {
            Ok(()) => {
                if let Some(guard) = guard {
                    guard.commit()?;
                }
                Ok(())
            }
            Err(e) => {
                if let Some(guard) = guard {
                    if let Err(restore_error) = guard.restore() {
                        log::error!("{}: {} (while handling: {})", stage.name(), restore_error, e);
                        return Err(restore_error.into());
                    }
                }
                Err(e)
            }
        }
    }
}

fn finish(
    stage: &dyn Stage,
    started: Instant,
    status: StageStatus,
    reason: Option<String>,
    error: Option<StageError>,
) -> StageResult {
    StageResult {
        stage: stage.name().to_string(),
        kind: stage.kind(),
        status,
        duration: started.elapsed(),
        reason,
        error,
        optional: stage.is_optional(),
    }
}

