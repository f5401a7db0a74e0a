use std::path::PathBuf;

use async_trait::async_trait;

use crate::command::CommandSpec;
use crate::install::VersionMarker;
use crate::stage_manager::core_stages::{InstallRuntimeStage, RuntimeOptions, hipconfig, markers, short};
use crate::stage_manager::{Readiness, Stage, StageContext, StageError, StageExecutor, StageKind};
use crate::utils;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildMode {
    /// Sync, configure, build and install
    #[default]
    Full,
    /// Stop after compiling; the install prefix is untouched
    BuildOnly,
    /// Install the outputs of a previous build
    InstallOnly,
    /// Wipe the build directory, then run a full build
    Clean,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub mode: BuildMode,
    /// Install the runtime once when the toolchain is incomplete
    pub install_toolchain: bool,
}

/// Builds llama.cpp against the installed runtime
#[derive(Debug, Clone, Default)]
pub struct BuildArtifactStage {
    options: BuildOptions,
    runtime_url: Option<String>,
}

impl BuildArtifactStage {
    /// `runtime_url` is used if the toolchain has to be installed first
    pub fn new(options: BuildOptions, runtime_url: Option<String>) -> Self {
        Self { options, runtime_url }
    }

    fn required_tools(&self) -> &'static [&'static str] {
        match self.options.mode {
            BuildMode::InstallOnly => &["cmake"],
            _ => &["cmake", "ninja", "git"],
        }
    }

    fn missing_toolchain(&self, context: &StageContext) -> Vec<String> {
        let mut missing: Vec<String> = self
            .required_tools()
            .iter()
            .filter(|tool| context.probe(tool).is_none())
            .map(|tool| tool.to_string())
            .collect();
        let hip = hipconfig(context.config());
        if self.options.mode != BuildMode::InstallOnly && !utils::is_executable(&hip) {
            missing.push(hip.display().to_string());
        }
        missing
    }

    /// Check the toolchain, installing the runtime once if allowed
    async fn ensure_toolchain(&self, context: &StageContext) -> Result<(), StageError> {
        let missing = self.missing_toolchain(context);
        if missing.is_empty() {
            return Ok(());
        }
        let remediate = self.options.install_toolchain || context.config().auto_install_toolchain;
        if !remediate {
            return Err(StageError::ToolchainMissing { missing });
        }

        log::warn!("Toolchain incomplete ({}), installing the runtime first", missing.join(", "));
        let runtime = InstallRuntimeStage::new(RuntimeOptions { url: self.runtime_url.clone(), ..Default::default() });
        let result = StageExecutor::execute_with(&runtime, context, false).await;
        if let Some(error) = result.error {
            return Err(error);
        }

        let missing = self.missing_toolchain(context);
        if missing.is_empty() { Ok(()) } else { Err(StageError::ToolchainMissing { missing }) }
    }

    fn git(context: &StageContext, args: &[&str]) -> CommandSpec {
        let config = context.config();
        CommandSpec::new("git")
            .arg("-C")
            .arg(config.source_dir().display().to_string())
            .args(args.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(config.timeouts.command)
            .label(format!("git {}", args.first().copied().unwrap_or_default()))
    }

    /// Bring the checkout to the configured ref and return its revision
    async fn sync_source(context: &StageContext) -> Result<String, StageError> {
        let config = context.config();
        let source = config.source_dir();
        let repo = config.llama_repo.as_str();

        if source.join(".git").is_dir() {
            context.run_checked(&Self::git(context, &["remote", "set-url", "origin", repo])).await?;
        } else {
            utils::remove_path(&source).map_err(StageError::io(&source))?;
            std::fs::create_dir_all(&source).map_err(StageError::io(&source))?;
            context.run_checked(&Self::git(context, &["init", "-q"])).await?;
            context.run_checked(&Self::git(context, &["remote", "add", "origin", repo])).await?;
        }

        log::info!("Fetching {} from {}", config.llama_ref, repo);
        context
            .run_checked(&Self::git(context, &["fetch", "--depth", "1", "origin", config.llama_ref.as_str()]))
            .await?;
        context.run_checked(&Self::git(context, &["checkout", "-q", "--detach", "-f", "FETCH_HEAD"])).await?;
        let output = context.run_checked(&Self::git(context, &["rev-parse", "HEAD"])).await?;
        let revision = output.stdout.trim().to_string();
        log::info!("llama.cpp at {}", short(&revision));
        Ok(revision)
    }

    fn cmake(context: &StageContext, label: &str) -> CommandSpec {
        let config = context.config();
        let mut spec = CommandSpec::new("cmake").envs(context.toolchain_env()).label(label);
        let clang = config.install_root.join("llvm").join("bin").join("clang");
        if clang.is_file() {
            spec = spec.env("HIPCXX", clang.display().to_string());
        }
        spec
    }

    async fn compile(context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        let build_dir = config.build_dir();
        std::fs::create_dir_all(&build_dir).map_err(StageError::io(&build_dir))?;

        let configure = Self::cmake(context, "cmake configure")
            .arg("-S")
            .arg(config.source_dir().display().to_string())
            .arg("-B")
            .arg(build_dir.display().to_string())
            .args(["-G", "Ninja", "-DGGML_HIP=ON", "-DCMAKE_BUILD_TYPE=Release"])
            .arg(format!("-DAMDGPU_TARGETS={}", config.gpu_target))
            .arg(format!("-DCMAKE_INSTALL_PREFIX={}", config.artifact_dir.display()))
            .args(config.cmake_args.iter().cloned())
            .timeout(config.timeouts.build);
        context.run_checked(&configure).await?;

        let jobs = config.build_jobs.map(|j| j as usize).unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });
        let build = Self::cmake(context, "cmake build")
            .arg("--build")
            .arg(build_dir.display().to_string())
            .args(["--config", "Release", "-j"])
            .arg(jobs.to_string())
            .timeout(config.timeouts.build);
        context.run_checked(&build).await?;
        Ok(())
    }

    fn has_build_outputs(context: &StageContext) -> bool {
        let config = context.config();
        let build_dir = config.build_dir();
        build_dir.join("CMakeCache.txt").is_file()
            && config
                .artifact_binaries
                .first()
                .is_none_or(|name| build_dir.join("bin").join(name).is_file())
    }

    async fn install(context: &StageContext, revision: &str) -> Result<(), StageError> {
        let config = context.config();
        let spec = Self::cmake(context, "cmake install")
            .arg("--install")
            .arg(config.build_dir().display().to_string())
            .arg("--prefix")
            .arg(config.artifact_dir.display().to_string())
            .timeout(config.timeouts.build);
        let output = context.run(&spec).await?;
        if !output.success() {
            return Err(StageError::InstallFailed {
                reason: format!("cmake --install into {} failed", config.artifact_dir.display()),
                diagnostics: output.diagnostics(),
            });
        }

        let missing: Vec<&str> = config
            .artifact_binaries
            .iter()
            .filter(|name| !config.artifact_dir.join("bin").join(name).is_file())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(StageError::InstallFailed {
                reason: format!("installed tree lacks {}", missing.join(", ")),
                diagnostics: String::new(),
            });
        }

        artifact_marker(context, revision).write(&config.artifact_dir)?;
        log::info!("Installed llama.cpp {} into {}", short(revision), config.artifact_dir.display());
        Ok(())
    }

    fn marker_matches(context: &StageContext, marker: Option<VersionMarker>) -> Option<VersionMarker> {
        let config = context.config();
        marker.filter(|m| {
            m.reference.as_deref() == Some(config.llama_ref.as_str())
                && m.target.as_deref() == Some(config.gpu_target.as_str())
        })
    }
}

fn artifact_marker(context: &StageContext, revision: &str) -> VersionMarker {
    let config = context.config();
    VersionMarker::new(markers::ARTIFACT, revision)
        .with_reference(config.llama_ref.as_str())
        .with_target(config.gpu_target.as_str())
}

#[async_trait]
impl Stage for BuildArtifactStage {
    fn kind(&self) -> StageKind {
        StageKind::BuildArtifact
    }

    fn description(&self) -> &str {
        match self.options.mode {
            BuildMode::Full => "Build and install llama.cpp for the GPU target",
            BuildMode::BuildOnly => "Build llama.cpp without installing it",
            BuildMode::InstallOnly => "Install a previously built llama.cpp",
            BuildMode::Clean => "Rebuild llama.cpp from a clean build directory",
        }
    }

    fn canonical_path(&self, context: &StageContext) -> Option<PathBuf> {
        match self.options.mode {
            BuildMode::BuildOnly => None,
            _ => Some(context.config().artifact_dir.clone()),
        }
    }

    async fn check(&self, context: &StageContext) -> Result<Readiness, StageError> {
        let config = context.config();
        match self.options.mode {
            BuildMode::Clean => Ok(Readiness::Pending),
            BuildMode::BuildOnly => {
                let stamp = VersionMarker::load(&config.build_dir(), markers::BUILD);
                match Self::marker_matches(context, stamp) {
                    Some(m) if Self::has_build_outputs(context) => {
                        Ok(Readiness::Satisfied(format!("llama.cpp {} already built", short(&m.version))))
                    }
                    _ => Ok(Readiness::Pending),
                }
            }
            BuildMode::Full | BuildMode::InstallOnly => {
                let installed = VersionMarker::load(&config.artifact_dir, markers::ARTIFACT);
                let binaries_present = config
                    .artifact_binaries
                    .iter()
                    .all(|name| config.artifact_dir.join("bin").join(name).is_file());
                match Self::marker_matches(context, installed) {
                    Some(m) if binaries_present => Ok(Readiness::Satisfied(format!(
                        "llama.cpp {} already installed for {}",
                        short(&m.version),
                        config.gpu_target
                    ))),
                    _ => Ok(Readiness::Pending),
                }
            }
        }
    }

    async fn execute(&self, context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        let build_dir = config.build_dir();
        self.ensure_toolchain(context).await?;

        if self.options.mode == BuildMode::Clean {
            log::info!("Removing {}", build_dir.display());
            utils::remove_path(&build_dir).map_err(StageError::io(&build_dir))?;
        }

        let revision = if self.options.mode == BuildMode::InstallOnly {
            if !Self::has_build_outputs(context) {
                return Err(StageError::BuildArtifactsMissing { path: build_dir });
            }
            VersionMarker::load(&build_dir, markers::BUILD)
                .map(|m| m.version)
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            let revision = Self::sync_source(context).await?;
            Self::compile(context).await?;
            VersionMarker::new(markers::BUILD, revision.as_str())
                .with_reference(config.llama_ref.as_str())
                .with_target(config.gpu_target.as_str())
                .write(&build_dir)?;
            revision
        };

        if self.options.mode == BuildMode::BuildOnly {
            return Ok(());
        }
        Self::install(context, &revision).await
    }

    fn dry_run_description(&self, context: &StageContext) -> String {
        let config = context.config();
        match self.options.mode {
            BuildMode::InstallOnly => format!(
                "Would install {} into {}",
                config.build_dir().display(),
                config.artifact_dir.display()
            ),
            _ => format!(
                "Would build llama.cpp {} for {} in {}",
                config.llama_ref,
                config.gpu_target,
                config.build_dir().display()
            ),
        }
    }
}
