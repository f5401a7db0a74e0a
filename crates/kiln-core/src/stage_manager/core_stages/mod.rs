//! The five built-in provisioning stages.
//!
//! | stage | canonical path | done when |
//! |---|---|---|
//! | `provision` | none | provision marker present and host tools on `PATH` |
//! | `install-runtime` | installation root | runtime marker matches the source |
//! | `build-artifact` | artifact install prefix | build marker matches ref and target |
//! | `validate` | none | validation marker matches revision and model |
//! | `package` | none (managed itself) | package marker in the installation root |
mod build;
mod package;
mod provision;
mod runtime;
mod validate;

use std::path::{Path, PathBuf};

pub use build::{BuildArtifactStage, BuildMode, BuildOptions};
pub use package::{PackageOptions, PackageStage};
pub(crate) use package::parse_ldd;
pub use provision::ProvisionStage;
pub use runtime::{InstallRuntimeStage, RuntimeMode, RuntimeOptions};
pub use validate::{ValidateOptions, ValidateStage};

use crate::archive::SourceSpec;
use crate::config::ConfigSnapshot;
use crate::stage_manager::Stage;

/// Marker component names
pub mod markers {
    pub const PROVISION: &str = "provision";
    pub const RUNTIME: &str = "runtime";
    pub const ARTIFACT: &str = "llama.cpp";
    pub const BUILD: &str = "llama.cpp-build";
    pub const VALIDATION: &str = "validation";
    pub const PACKAGE: &str = "package";
}

/// Per-invocation options of the core stages
#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    pub runtime: RuntimeOptions,
    pub build: BuildOptions,
    pub validate: ValidateOptions,
    pub package: PackageOptions,
}

/// The core stages in pipeline order
pub fn default_stages(options: &StageOptions) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(ProvisionStage),
        Box::new(InstallRuntimeStage::new(options.runtime.clone())),
        Box::new(BuildArtifactStage::new(options.build.clone(), options.runtime.url.clone())),
        Box::new(ValidateStage::new(options.validate.clone())),
        Box::new(PackageStage::new(options.package.clone())),
    ]
}

/// Where the runtime archive comes from: an explicit URL or local path,
/// otherwise the newest nightly for the configured target
pub fn runtime_source(config: &ConfigSnapshot, url_override: Option<&str>) -> SourceSpec {
    let (location, sha256) = match url_override {
        Some(url) => (Some(url), None),
        None => (config.rocm_url.as_deref(), config.archive_sha256.clone()),
    };
    match location {
        Some(location) => {
            if let Some(path) = location.strip_prefix("file://") {
                SourceSpec::Local(PathBuf::from(path))
            } else if Path::new(location).is_absolute() {
                SourceSpec::Local(PathBuf::from(location))
            } else {
                SourceSpec::Url { url: location.to_string(), sha256 }
            }
        }
        None => SourceSpec::Nightly { platform: config.platform.clone(), target: config.gpu_target.clone() },
    }
}

/// `hipconfig` under the installation root
pub(crate) fn hipconfig(config: &ConfigSnapshot) -> PathBuf {
    config.runtime_bin().join("hipconfig")
}

/// First line of a revision or version string, shortened for messages
pub(crate) fn short(revision: &str) -> &str {
    let line = revision.lines().next().unwrap_or(revision).trim();
    line.get(..12).unwrap_or(line)
}
