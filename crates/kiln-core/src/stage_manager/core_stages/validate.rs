use std::path::PathBuf;

use async_trait::async_trait;

use crate::command::CommandSpec;
use crate::install::VersionMarker;
use crate::stage_manager::core_stages::{markers, short};
use crate::stage_manager::{Readiness, Stage, StageContext, StageError, StageKind};

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Binary to exercise; defaults to the primary artifact binary
    pub binary: Option<PathBuf>,
    /// Model overriding the configured one
    pub model: Option<PathBuf>,
}

/// Smoke test of the built artifact against a model.
///
/// Optional: a failure is reported but does not halt a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct ValidateStage {
    options: ValidateOptions,
}

impl ValidateStage {
    pub fn new(options: ValidateOptions) -> Self {
        Self { options }
    }

    fn binary(&self, context: &StageContext) -> Option<PathBuf> {
        self.options.binary.clone().or_else(|| context.config().primary_binary())
    }

    fn model(&self, context: &StageContext) -> Option<PathBuf> {
        self.options.model.clone().or_else(|| context.config().model_path.clone())
    }

    fn artifact_revision(context: &StageContext) -> Option<String> {
        VersionMarker::load(&context.config().artifact_dir, markers::ARTIFACT).map(|m| m.version)
    }
}

#[async_trait]
impl Stage for ValidateStage {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    fn description(&self) -> &str {
        "Run the built binary against a model"
    }

    fn is_optional(&self) -> bool {
        true
    }

    async fn check(&self, context: &StageContext) -> Result<Readiness, StageError> {
        let Some(model) = self.model(context) else {
            return Ok(Readiness::NotApplicable("no model configured".to_string()));
        };
        let binary = match self.binary(context) {
            Some(binary) if binary.is_file() => binary,
            Some(binary) => return Err(StageError::ValidationInputMissing { what: "binary", path: binary }),
            None => {
                return Err(StageError::ValidationInputMissing {
                    what: "binary",
                    path: context.config().artifact_dir.join("bin"),
                });
            }
        };
        if !model.is_file() {
            return Err(StageError::ValidationInputMissing { what: "model", path: model });
        }

        let model_ref = model.display().to_string();
        let passed = match (
            Self::artifact_revision(context),
            VersionMarker::load(&context.config().workspace, markers::VALIDATION),
        ) {
            (Some(revision), Some(marker)) => {
                marker.version == revision && marker.reference.as_deref() == Some(model_ref.as_str())
            }
            _ => false,
        };
        if passed {
            Ok(Readiness::Satisfied(format!("{} already validated", binary.display())))
        } else {
            Ok(Readiness::Pending)
        }
    }

    async fn execute(&self, context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        let (Some(binary), Some(model)) = (self.binary(context), self.model(context)) else {
            return Err(StageError::ValidationInputMissing { what: "model", path: config.workspace.clone() });
        };

        let spec = CommandSpec::new(binary.display().to_string())
            .arg("-m")
            .arg(model.display().to_string())
            .args(config.validate_args.iter().cloned())
            .envs(context.toolchain_env())
            .timeout(config.timeouts.validate)
            .label("validation run");
        let output = context.run(&spec).await?;
        if output.timed_out {
            return Err(StageError::CommandTimedOut {
                label: spec.get_label().to_string(),
                timeout: config.timeouts.validate,
                diagnostics: output.diagnostics(),
            });
        }
        if !output.success() {
            return Err(StageError::VerificationFailed {
                reason: format!("{} exited with {:?}", binary.display(), output.exit_code),
                diagnostics: output.diagnostics(),
            });
        }

        let revision = Self::artifact_revision(context).unwrap_or_else(|| "unknown".to_string());
        VersionMarker::new(markers::VALIDATION, revision.as_str())
            .with_reference(model.display().to_string())
            .with_target(config.gpu_target.as_str())
            .write(&config.workspace)?;
        log::info!("Validation passed for llama.cpp {}", short(&revision));
        Ok(())
    }

    fn dry_run_description(&self, context: &StageContext) -> String {
        match (self.binary(context), self.model(context)) {
            (Some(binary), Some(model)) => {
                format!("Would run {} -m {}", binary.display(), model.display())
            }
            _ => "Would skip validation: no model configured".to_string(),
        }
    }
}
