use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::command::CommandSpec;
use crate::install::{InstallError, InstallationRecord, VersionMarker};
use crate::kernel::constants::STATE_DIR_NAME;
use crate::stage_manager::core_stages::markers;
use crate::stage_manager::{Readiness, Stage, StageContext, StageError, StageKind};
use crate::utils::{self, fs};

/// Symlink hops followed before a chain is treated as a loop
const MAX_LINK_HOPS: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    /// Put the archived full runtime back instead of trimming
    pub restore: bool,
    /// Delete the full runtime instead of archiving it
    pub no_archive: bool,
}

/// Trims the runtime down to what the artifact links against
#[derive(Debug, Clone, Default)]
pub struct PackageStage {
    options: PackageOptions,
}

impl PackageStage {
    pub fn new(options: PackageOptions) -> Self {
        Self { options }
    }

    fn record(context: &StageContext) -> InstallationRecord {
        InstallationRecord::new(&context.config().install_root)
    }

    /// Runtime libraries every artifact binary resolves to
    async fn linked_libraries(context: &StageContext) -> Result<BTreeSet<PathBuf>, StageError> {
        let config = context.config();
        let roots = runtime_roots(&config.install_root);
        let binaries = fs::find_binaries(&config.artifact_dir).map_err(StageError::io(&config.artifact_dir))?;

        let mut libraries = BTreeSet::new();
        for binary in &binaries {
            let spec = CommandSpec::new("ldd")
                .arg(binary.display().to_string())
                .envs(context.toolchain_env())
                .timeout(config.timeouts.command)
                .label("ldd");
            let output = context.run(&spec).await?;
            if !output.success() {
                log::debug!("ldd skipped {}: not a dynamic object", binary.display());
                continue;
            }
            libraries.extend(
                parse_ldd(&output.stdout)
                    .into_iter()
                    .filter_map(|lib| relative_to_roots(&lib, &roots).map(|rel| config.install_root.join(rel))),
            );
        }
        log::info!("{} binaries link against {} runtime libraries", binaries.len(), libraries.len());
        Ok(libraries)
    }

    /// Copy `library` into `staging`, following its symlink chain so every
    /// link and the final file land in the trimmed tree
    fn copy_chain(root: &Path, staging: &Path, library: &Path) -> Result<(), StageError> {
        let mut current = library.to_path_buf();
        for _ in 0..MAX_LINK_HOPS {
            let Ok(relative) = current.strip_prefix(root) else {
                log::warn!("{} points outside {}, not copied", current.display(), root.display());
                return Ok(());
            };
            let dest = staging.join(relative);
            fs::copy_entry(&current, &dest).map_err(StageError::io(&current))?;

            let is_link = current.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false);
            if !is_link {
                return Ok(());
            }
            let target = std::fs::read_link(&current).map_err(StageError::io(&current))?;
            current = match current.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target,
            };
        }
        log::warn!("Symlink chain from {} is too long, stopped following", library.display());
        Ok(())
    }

    async fn trim(&self, context: &StageContext) -> Result<(), StageError> {
        let config = context.config();
        if context.probe("ldd").is_none() {
            return Err(StageError::HostToolMissing { tool: "ldd".to_string() });
        }
        let root = &config.install_root;
        let record = Self::record(context);
        let staging = record.staging_path();
        record.recover()?;
        utils::remove_path(&staging).map_err(StageError::io(&staging))?;

        let result = self.assemble(context, &staging).await.and_then(|()| {
            record
                .archive_and_replace(&staging, !self.options.no_archive)
                .map_err(StageError::from)
        });
        if result.is_err() {
            if let Err(e) = utils::remove_path(&staging) {
                log::warn!("Could not remove {}: {}", staging.display(), e);
            }
        }
        result?;
        log::info!("Trimmed runtime installed at {}", root.display());
        Ok(())
    }

    async fn assemble(&self, context: &StageContext, staging: &Path) -> Result<(), StageError> {
        let config = context.config();
        let root = &config.install_root;
        std::fs::create_dir_all(staging).map_err(StageError::io(staging))?;

        for library in Self::linked_libraries(context).await? {
            Self::copy_chain(root, staging, &library)?;
        }
        for keep in &config.package_keep {
            let tree = root.join(keep);
            if utils::path_occupied(&tree) {
                fs::copy_entry(&tree, staging.join(keep)).map_err(StageError::io(&tree))?;
            } else {
                log::warn!("{} not present, nothing kept", tree.display());
            }
        }
        let state = root.join(STATE_DIR_NAME);
        if state.is_dir() {
            fs::copy_dir_all(&state, staging.join(STATE_DIR_NAME)).map_err(StageError::io(&state))?;
        }

        let kept = fs::find_files(staging, &|_: &Path| true).map_err(StageError::io(staging))?.len();
        VersionMarker::new(markers::PACKAGE, kept.to_string())
            .with_reference(config.artifact_dir.display().to_string())
            .with_target(config.gpu_target.as_str())
            .write(staging)?;
        Ok(())
    }
}

/// Library paths from `ldd` output lines of the form
/// `libfoo.so.1 => /path/libfoo.so.1 (0x...)`
pub(crate) fn parse_ldd(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| line.split_once("=>"))
        .filter_map(|(_, resolved)| resolved.split_whitespace().next())
        .filter(|path| path.starts_with('/'))
        .map(PathBuf::from)
        .collect()
}

/// The installation root as written and as resolved on disk
fn runtime_roots(root: &Path) -> Vec<PathBuf> {
    let mut roots = vec![root.to_path_buf()];
    if let Ok(resolved) = root.canonicalize() {
        if resolved != root {
            roots.push(resolved);
        }
    }
    roots
}

fn relative_to_roots(path: &Path, roots: &[PathBuf]) -> Option<PathBuf> {
    roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .map(Path::to_path_buf)
}

#[async_trait]
impl Stage for PackageStage {
    fn kind(&self) -> StageKind {
        StageKind::Package
    }

    fn description(&self) -> &str {
        if self.options.restore {
            "Restore the archived full runtime"
        } else {
            "Trim the runtime to the libraries the artifact needs"
        }
    }

    async fn check(&self, context: &StageContext) -> Result<Readiness, StageError> {
        let config = context.config();
        let record = Self::record(context);
        if self.options.restore {
            if !utils::path_occupied(record.archive_path()) {
                return Err(InstallError::ArchiveMissing(record.archive_path()).into());
            }
            return Ok(Readiness::Pending);
        }

        if let Some(marker) = VersionMarker::load(&config.install_root, markers::PACKAGE) {
            return Ok(Readiness::Satisfied(format!(
                "runtime already trimmed to {} entries",
                marker.version
            )));
        }
        if !config.install_root.is_dir() {
            return Err(StageError::ToolchainMissing { missing: vec![config.install_root.display().to_string()] });
        }
        if !config.artifact_dir.is_dir() {
            return Err(StageError::BuildArtifactsMissing { path: config.artifact_dir.clone() });
        }
        Ok(Readiness::Pending)
    }

    async fn execute(&self, context: &StageContext) -> Result<(), StageError> {
        if self.options.restore {
            Self::record(context).restore_archive()?;
            log::info!("Full runtime restored at {}", context.config().install_root.display());
            return Ok(());
        }
        self.trim(context).await
    }

    fn dry_run_description(&self, context: &StageContext) -> String {
        let config = context.config();
        let record = Self::record(context);
        if self.options.restore {
            format!("Would move {} back to {}", record.archive_path().display(), config.install_root.display())
        } else if self.options.no_archive {
            format!("Would trim {} and delete the full runtime", config.install_root.display())
        } else {
            format!(
                "Would trim {} and archive the full runtime at {}",
                config.install_root.display(),
                record.archive_path().display()
            )
        }
    }
}
