use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::kernel::constants::STATE_DIR_NAME;

/// Wall-clock limits applied to external work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeouts {
    /// Ordinary commands (package manager, git, tar, ldconfig, ldd)
    pub command: Duration,
    /// CMake configure and build steps
    pub build: Duration,
    /// A single archive transfer
    pub download: Duration,
    /// The smoke test run by the validate stage
    pub validate: Duration,
}

/// Immutable, fully resolved settings for one run.
///
/// Built once by [`resolve`](super::resolve) and shared behind an `Arc`;
/// nothing downstream mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    /// Canonical path of the ROCm runtime
    pub install_root: PathBuf,
    /// Working area for sources, builds and state files
    pub workspace: PathBuf,
    /// Where fetched archives are kept
    pub cache_dir: PathBuf,
    /// GPU architecture identifier, e.g. `gfx1151`
    pub gpu_target: String,
    /// Platform used for nightly tarball lookups
    pub platform: String,
    pub non_interactive: bool,
    pub force: bool,
    /// Explicit runtime archive; nightly discovery is used when unset
    pub rocm_url: Option<String>,
    pub archive_sha256: Option<String>,
    pub llama_repo: String,
    pub llama_ref: String,
    /// Canonical install prefix of the built artifact
    pub artifact_dir: PathBuf,
    pub cmake_args: Vec<String>,
    pub build_jobs: Option<u32>,
    /// Binaries (relative to `artifact_dir/bin`) a finished build must contain
    pub artifact_binaries: Vec<String>,
    pub model_path: Option<PathBuf>,
    pub validate_args: Vec<String>,
    pub package_manager: String,
    pub system_packages: Vec<String>,
    pub use_sudo: bool,
    /// Tools the provision stage guarantees on `PATH`
    pub host_tools: Vec<String>,
    /// Loader configuration written by install-runtime; skipped when unset
    pub ld_conf_file: Option<PathBuf>,
    /// Trees (relative to the install root) always kept by the package stage
    pub package_keep: Vec<String>,
    pub auto_install_toolchain: bool,
    pub timeouts: Timeouts,
}

impl ConfigSnapshot {
    /// Directory holding kiln's own marker files for this workspace
    pub fn state_dir(&self) -> PathBuf {
        self.workspace.join(STATE_DIR_NAME)
    }

    /// Checkout of the llama.cpp sources
    pub fn source_dir(&self) -> PathBuf {
        self.workspace.join("llama.cpp")
    }

    /// CMake binary directory
    pub fn build_dir(&self) -> PathBuf {
        self.workspace.join("build").join("llama.cpp")
    }

    /// Shell fragment exporting the runtime environment
    pub fn env_script(&self) -> PathBuf {
        self.workspace.join("env.sh")
    }

    pub fn runtime_bin(&self) -> PathBuf {
        self.install_root.join("bin")
    }

    pub fn runtime_lib(&self) -> PathBuf {
        self.install_root.join("lib")
    }

    /// Primary artifact binary (the first of `artifact_binaries`)
    pub fn primary_binary(&self) -> Option<PathBuf> {
        self.artifact_binaries
            .first()
            .map(|name| self.artifact_dir.join("bin").join(name))
    }

    /// `LD_LIBRARY_PATH` value covering the runtime and the artifact
    pub fn library_path(&self) -> String {
        join_paths(&[
            self.runtime_lib(),
            self.install_root.join("lib64"),
            self.artifact_dir.join("lib"),
        ])
    }

    /// `PATH` value with the runtime's `bin` prepended to `inherited`
    pub fn search_path(&self, inherited: Option<&str>) -> String {
        let mut path = self.runtime_bin().display().to_string();
        if let Some(rest) = inherited.filter(|p| !p.is_empty()) {
            path.push(':');
            path.push_str(rest);
        }
        path
    }

    /// Environment every toolchain-facing command runs with
    pub fn toolchain_env(&self, inherited_path: Option<&str>) -> Vec<(String, String)> {
        let root = self.install_root.display().to_string();
        vec![
            ("ROCM_PATH".to_string(), root.clone()),
            ("HIP_PATH".to_string(), root),
            ("HIP_PLATFORM".to_string(), "amd".to_string()),
            ("PATH".to_string(), self.search_path(inherited_path)),
            ("LD_LIBRARY_PATH".to_string(), self.library_path()),
        ]
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":")
}

/// `true` when `path` is absolute and non-empty
pub(crate) fn is_usable_absolute(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.is_absolute()
}
