use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::command::CommandSpec;
use crate::install::{InstallationRecord, VersionMarker};
use crate::stage_manager::core_stages::{hipconfig, markers, runtime_source, short};
use crate::stage_manager::{Readiness, Stage, StageContext, StageError, StageKind};
use crate::utils::{self, fs::write_atomic};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Fetch, extract, configure and verify
    #[default]
    Full,
    /// Only run the post-install verification
    VerifyOnly,
    /// Only regenerate the environment script and loader configuration
    ConfigureOnly,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Archive URL or path overriding the configured source
    pub url: Option<String>,
    pub mode: RuntimeMode,
}

/// Installs the ROCm runtime tarball at the installation root
#[derive(Debug, Clone, Default)]
pub struct InstallRuntimeStage {
    options: RuntimeOptions,
}

impl InstallRuntimeStage {
    pub fn new(options: RuntimeOptions) -> Self {
        Self { options }
    }

    fn env_script_contents(context: &StageContext) -> String {
        let config = context.config();
        let root = config.install_root.display();
        format!(
            "# Generated by kiln. Source this file to use the ROCm runtime.\n\
             export ROCM_PATH=\"{root}\"\n\
             export HIP_PATH=\"{root}\"\n\
             export HIP_PLATFORM=amd\n\
             export PATH=\"{root}/bin:$PATH\"\n\
             export LD_LIBRARY_PATH=\"{libs}${{LD_LIBRARY_PATH:+:$LD_LIBRARY_PATH}}\"\n",
            root = root,
            libs = config.library_path(),
        )
    }

    fn ld_conf_contents(context: &StageContext) -> String {
        let config = context.config();
        format!("{}\n{}\n", config.runtime_lib().display(), config.install_root.join("lib64").display())
    }

    fn is_configured(context: &StageContext) -> bool {
        let config = context.config();
        let script_ok = std::fs::read_to_string(config.env_script())
            .map(|s| s == Self::env_script_contents(context))
            .unwrap_or(false);
        let ld_ok = match &config.ld_conf_file {
            Some(path) => std::fs::read_to_string(path)
                .map(|s| s == Self::ld_conf_contents(context))
                .unwrap_or(false),
            None => true,
        };
        script_ok && ld_ok
    }

    /// Write the environment script and, when configured, the loader config
    pub async fn configure(context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        if !config.install_root.is_dir() {
            return Err(StageError::ToolchainMissing { missing: vec![config.install_root.display().to_string()] });
        }

        let script = config.env_script();
        write_atomic(&script, Self::env_script_contents(context)).map_err(StageError::io(&script))?;
        log::info!("Wrote {}", script.display());

        if let Some(conf) = &config.ld_conf_file {
            write_atomic(conf, Self::ld_conf_contents(context)).map_err(StageError::io(conf))?;
            let ldconfig = if config.use_sudo {
                CommandSpec::new("sudo").arg("ldconfig")
            } else {
                CommandSpec::new("ldconfig")
            };
            context.run_checked(&ldconfig.timeout(config.timeouts.command)).await?;
            log::info!("Registered runtime libraries in {}", conf.display());
        }
        Ok(())
    }

    /// `hipconfig --version` must run cleanly from the installed tree
    pub async fn verify(context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        let tool = hipconfig(config);
        if !utils::is_executable(&tool) {
            return Err(StageError::VerificationFailed {
                reason: format!("{} is missing or not executable", tool.display()),
                diagnostics: String::new(),
            });
        }
        let spec = CommandSpec::new(tool.display().to_string())
            .arg("--version")
            .envs(context.toolchain_env())
            .timeout(config.timeouts.command)
            .label("hipconfig --version");
        let output = context.run(&spec).await?;
        if !output.success() {
            return Err(StageError::VerificationFailed {
                reason: format!("hipconfig exited with {:?}", output.exit_code),
                diagnostics: output.diagnostics(),
            });
        }
        log::info!("ROCm runtime verified: HIP {}", short(&output.stdout));
        Ok(())
    }

    async fn install(&self, context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        if context.probe("tar").is_none() {
            return Err(StageError::HostToolMissing { tool: "tar".to_string() });
        }

        let source = runtime_source(config, self.options.url.as_deref());
        let archive = context.provisioner().ensure(&source, &config.cache_dir).await?;

        let record = InstallationRecord::new(&config.install_root);
        let staging = record.staging_path();
        utils::remove_path(&staging).map_err(StageError::io(&staging))?;
        std::fs::create_dir_all(&staging).map_err(StageError::io(&staging))?;

        let result = Self::extract_into_place(context, &archive, &staging, &config.install_root).await;
        if let Err(e) = utils::remove_path(&staging) {
            log::warn!("Could not remove {}: {}", staging.display(), e);
        }
        result?;

        VersionMarker::new(markers::RUNTIME, source.identity())
            .with_reference(archive.display().to_string())
            .with_target(config.gpu_target.as_str())
            .write(&config.install_root)?;

        Self::configure(context).await?;
        Self::verify(context).await
    }

    async fn extract_into_place(
        context: &StageContext,
        archive: &Path,
        staging: &Path,
        root: &Path,
    ) -> Result<(), StageError> {
        let spec = CommandSpec::new("tar")
            .arg("-xf")
            .arg(archive.display().to_string())
            .arg("-C")
            .arg(staging.display().to_string())
            .timeout(context.config().timeouts.command)
            .label("extract runtime");
        let output = context.run(&spec).await?;
        if !output.success() {
            return Err(StageError::InstallFailed {
                reason: format!("could not extract {}", archive.display()),
                diagnostics: output.diagnostics(),
            });
        }

        let tree = single_top_level_dir(staging).unwrap_or_else(|| staging.to_path_buf());
        if let Some(parent) = root.parent() {
            std::fs::create_dir_all(parent).map_err(StageError::io(parent))?;
        }
        std::fs::rename(&tree, root).map_err(StageError::io(root))?;
        log::info!("Installed runtime at {}", root.display());
        Ok(())
    }
}

/// The only entry of `dir`, when that entry is a directory
fn single_top_level_dir(dir: &Path) -> Option<PathBuf> {
    let mut entries = std::fs::read_dir(dir).ok()?.filter_map(|e| e.ok());
    let first = entries.next()?;
    if entries.next().is_some() {
        return None;
    }
    let path = first.path();
    path.symlink_metadata().ok().filter(|m| m.is_dir()).map(|_| path)
}

#[async_trait]
impl Stage for InstallRuntimeStage {
    fn kind(&self) -> StageKind {
        StageKind::InstallRuntime
    }

    fn description(&self) -> &str {
        match self.options.mode {
            RuntimeMode::Full => "Install the ROCm runtime at the installation root",
            RuntimeMode::VerifyOnly => "Verify the installed ROCm runtime",
            RuntimeMode::ConfigureOnly => "Write the ROCm runtime environment configuration",
        }
    }

    fn canonical_path(&self, context: &StageContext) -> Option<PathBuf> {
        match self.options.mode {
            RuntimeMode::Full => Some(context.config().install_root.clone()),
            RuntimeMode::VerifyOnly | RuntimeMode::ConfigureOnly => None,
        }
    }

    async fn check(&self, context: &StageContext) -> Result<Readiness, StageError> {
        let config = context.config();
        match self.options.mode {
            RuntimeMode::VerifyOnly => Ok(Readiness::Pending),
            RuntimeMode::ConfigureOnly if Self::is_configured(context) => {
                Ok(Readiness::Satisfied("runtime environment already configured".to_string()))
            }
            RuntimeMode::ConfigureOnly => Ok(Readiness::Pending),
            RuntimeMode::Full => {
                let identity = runtime_source(config, self.options.url.as_deref()).identity();
                let installed = VersionMarker::load(&config.install_root, markers::RUNTIME)
                    .is_some_and(|m| m.version == identity);
                if !installed {
                    return Ok(Readiness::Pending);
                }
                // A trimmed runtime no longer carries the toolchain
                if VersionMarker::load(&config.install_root, markers::PACKAGE).is_some() {
                    return Ok(Readiness::Satisfied(format!(
                        "runtime from {} installed and trimmed; use package --restore or --force",
                        identity
                    )));
                }
                if utils::is_executable(hipconfig(config)) && Self::is_configured(context) {
                    Ok(Readiness::Satisfied(format!("runtime from {} already installed", identity)))
                } else {
                    Ok(Readiness::Pending)
                }
            }
        }
    }

    async fn execute(&self, context: &StageContext) -> Result<(), StageError> {
        match self.options.mode {
            RuntimeMode::Full => self.install(context).await,
            RuntimeMode::VerifyOnly => Self::verify(context).await,
            RuntimeMode::ConfigureOnly => Self::configure(context).await,
        }
    }

    fn dry_run_description(&self, context: &StageContext) -> String {
        let config = context.config();
        match self.options.mode {
            RuntimeMode::Full => format!(
                "Would install the runtime from {} into {}",
                runtime_source(config, self.options.url.as_deref()),
                config.install_root.display()
            ),
            RuntimeMode::VerifyOnly => format!("Would run {} --version", hipconfig(config).display()),
            RuntimeMode::ConfigureOnly => format!("Would write {}", config.env_script().display()),
        }
    }
}
