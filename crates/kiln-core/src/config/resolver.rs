use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::error::ConfigError;
use crate::config::format::ConfigFormat;
use crate::config::snapshot::{ConfigSnapshot, Timeouts, is_usable_absolute};
use crate::kernel::constants;

/// One layer of settings. Every field is optional; later layers win.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub install_root: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub gpu_target: Option<String>,
    pub platform: Option<String>,
    pub non_interactive: Option<bool>,
    pub force: Option<bool>,
    pub rocm_url: Option<String>,
    pub archive_sha256: Option<String>,
    pub llama_repo: Option<String>,
    pub llama_ref: Option<String>,
    pub artifact_dir: Option<PathBuf>,
    pub cmake_args: Option<Vec<String>>,
    pub build_jobs: Option<u32>,
    pub artifact_binaries: Option<Vec<String>>,
    pub model_path: Option<PathBuf>,
    pub validate_args: Option<Vec<String>>,
    pub package_manager: Option<String>,
    pub system_packages: Option<Vec<String>>,
    pub use_sudo: Option<bool>,
    pub host_tools: Option<Vec<String>>,
    pub ld_conf_file: Option<PathBuf>,
    pub package_keep: Option<Vec<String>>,
    pub auto_install_toolchain: Option<bool>,
    pub command_timeout_secs: Option<u64>,
    pub build_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub validate_timeout_secs: Option<u64>,
}

macro_rules! overlay {
    ($target:ident, $layer:ident; $($field:ident),+ $(,)?) => {
        $( if $layer.$field.is_some() { $target.$field = $layer.$field; } )+
    };
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl PartialConfig {
    /// Built-in defaults. Relative defaults are anchored at `base_dir`.
    pub fn builtin(base_dir: &Path) -> Self {
        Self {
            install_root: Some(PathBuf::from(constants::DEFAULT_INSTALL_ROOT)),
            workspace: Some(base_dir.join(constants::DEFAULT_WORKSPACE_DIR)),
            gpu_target: Some(constants::DEFAULT_GPU_TARGET.to_string()),
            platform: Some(constants::DEFAULT_PLATFORM.to_string()),
            non_interactive: Some(false),
            force: Some(false),
            llama_repo: Some(constants::DEFAULT_LLAMA_REPO.to_string()),
            llama_ref: Some(constants::DEFAULT_LLAMA_REF.to_string()),
            cmake_args: Some(Vec::new()),
            artifact_binaries: Some(strings(&["llama-cli", "llama-server", "llama-bench"])),
            validate_args: Some(strings(&["-n", "16", "-p", "Hello", "-ngl", "99", "-no-cnv"])),
            package_manager: Some("apt-get".to_string()),
            system_packages: Some(strings(&[
                "build-essential",
                "cmake",
                "ninja-build",
                "git",
                "curl",
                "ca-certificates",
                "libcurl4-openssl-dev",
            ])),
            use_sudo: Some(false),
            host_tools: Some(strings(&["git", "cmake", "ninja", "tar"])),
            package_keep: Some(strings(&["lib/rocblas/library", "lib/hipblaslt/library"])),
            auto_install_toolchain: Some(false),
            command_timeout_secs: Some(constants::DEFAULT_COMMAND_TIMEOUT_SECS),
            build_timeout_secs: Some(constants::DEFAULT_BUILD_TIMEOUT_SECS),
            download_timeout_secs: Some(constants::DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            validate_timeout_secs: Some(constants::DEFAULT_VALIDATE_TIMEOUT_SECS),
            ..Self::default()
        }
    }

    /// Settings taken from an explicit environment map.
    ///
    /// The map is passed in rather than read from the process so resolution
    /// stays a pure merge.
    pub fn from_env(env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let first = |keys: &[&str]| keys.iter().find_map(|k| get(k));

        let mut layer = Self {
            install_root: first(&["KILN_INSTALL_ROOT", "ROCM_PATH"]).map(PathBuf::from),
            workspace: get("KILN_WORKSPACE").map(PathBuf::from),
            cache_dir: get("KILN_CACHE_DIR").map(PathBuf::from),
            gpu_target: first(&["KILN_GPU_TARGET", "GFX_TARGET"]).map(str::to_string),
            platform: get("KILN_PLATFORM").map(str::to_string),
            rocm_url: get("KILN_ROCM_URL").map(str::to_string),
            llama_ref: get("KILN_LLAMA_REF").map(str::to_string),
            model_path: get("KILN_MODEL").map(PathBuf::from),
            ..Self::default()
        };

        if let Some(v) = get("KILN_NON_INTERACTIVE") {
            layer.non_interactive = Some(parse_flag("KILN_NON_INTERACTIVE", v)?);
        }
        if let Some(v) = get("KILN_FORCE") {
            layer.force = Some(parse_flag("KILN_FORCE", v)?);
        }
        if let Some(v) = get("KILN_COMMAND_TIMEOUT") {
            layer.command_timeout_secs = Some(parse_secs("KILN_COMMAND_TIMEOUT", v)?);
        }
        if let Some(v) = get("KILN_BUILD_TIMEOUT") {
            layer.build_timeout_secs = Some(parse_secs("KILN_BUILD_TIMEOUT", v)?);
        }
        if let Some(v) = get("KILN_DOWNLOAD_TIMEOUT") {
            layer.download_timeout_secs = Some(parse_secs("KILN_DOWNLOAD_TIMEOUT", v)?);
        }
        if let Some(v) = get("KILN_VALIDATE_TIMEOUT") {
            layer.validate_timeout_secs = Some(parse_secs("KILN_VALIDATE_TIMEOUT", v)?);
        }
        Ok(layer)
    }

    /// Read a layer from a configuration file, format chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        format.parse(&data, path)
    }

    /// Overlay `layer` on top of `self`, field by field.
    pub fn merge(mut self, layer: PartialConfig) -> Self {
        overlay!(self, layer;
            install_root, workspace, cache_dir, gpu_target, platform, non_interactive,
            force, rocm_url, archive_sha256, llama_repo, llama_ref, artifact_dir,
            cmake_args, build_jobs, artifact_binaries, model_path, validate_args,
            package_manager, system_packages, use_sudo, host_tools, ld_conf_file,
            package_keep, auto_install_toolchain, command_timeout_secs,
            build_timeout_secs, download_timeout_secs, validate_timeout_secs,
        );
        self
    }

    /// Join relative directory settings onto `base`. The installation root
    /// is left alone: it must be given as an absolute path.
    pub fn anchored(mut self, base: &Path) -> Self {
        let anchor = |p: Option<PathBuf>| p.map(|p| if p.is_relative() { base.join(p) } else { p });
        self.workspace = anchor(self.workspace);
        self.cache_dir = anchor(self.cache_dir);
        self.artifact_dir = anchor(self.artifact_dir);
        self.model_path = anchor(self.model_path);
        self.ld_conf_file = anchor(self.ld_conf_file);
        self
    }

    fn finish(self) -> Result<ConfigSnapshot, ConfigError> {
        let install_root = self
            .install_root
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingInstallRoot)?;
        if !is_usable_absolute(&install_root) {
            return Err(ConfigError::RelativePath { key: "install_root", path: install_root });
        }

        let workspace = required(self.workspace, "workspace")?;
        if !is_usable_absolute(&workspace) {
            return Err(ConfigError::RelativePath { key: "workspace", path: workspace });
        }
        let cache_dir = self.cache_dir.unwrap_or_else(|| workspace.join("cache"));
        let artifact_dir = self.artifact_dir.unwrap_or_else(|| workspace.join("llama-install"));

        let gpu_target = required(self.gpu_target, "gpu_target")?;
        if gpu_target.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "gpu_target".to_string(),
                value: gpu_target,
                reason: "must not be empty".to_string(),
            });
        }

        Ok(ConfigSnapshot {
            install_root,
            workspace,
            cache_dir,
            gpu_target,
            platform: required(self.platform, "platform")?,
            non_interactive: self.non_interactive.unwrap_or(false),
            force: self.force.unwrap_or(false),
            rocm_url: self.rocm_url,
            archive_sha256: self.archive_sha256,
            llama_repo: required(self.llama_repo, "llama_repo")?,
            llama_ref: required(self.llama_ref, "llama_ref")?,
            artifact_dir,
            cmake_args: self.cmake_args.unwrap_or_default(),
            build_jobs: self.build_jobs,
            artifact_binaries: self.artifact_binaries.unwrap_or_default(),
            model_path: self.model_path,
            validate_args: self.validate_args.unwrap_or_default(),
            package_manager: required(self.package_manager, "package_manager")?,
            system_packages: self.system_packages.unwrap_or_default(),
            use_sudo: self.use_sudo.unwrap_or(false),
            host_tools: self.host_tools.unwrap_or_default(),
            ld_conf_file: self.ld_conf_file,
            package_keep: self.package_keep.unwrap_or_default(),
            auto_install_toolchain: self.auto_install_toolchain.unwrap_or(false),
            timeouts: Timeouts {
                command: secs(self.command_timeout_secs, constants::DEFAULT_COMMAND_TIMEOUT_SECS),
                build: secs(self.build_timeout_secs, constants::DEFAULT_BUILD_TIMEOUT_SECS),
                download: secs(self.download_timeout_secs, constants::DEFAULT_DOWNLOAD_TIMEOUT_SECS),
                validate: secs(self.validate_timeout_secs, constants::DEFAULT_VALIDATE_TIMEOUT_SECS),
            },
        })
    }
}

fn required<T>(value: Option<T>, key: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: String::new(),
        reason: "no value in defaults, file, environment or flags".to_string(),
    })
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean (1/0, true/false, yes/no, on/off)".to_string(),
        }),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a positive number of seconds".to_string(),
        }),
    }
}

/// Which configuration file to consult
#[derive(Debug, Clone, Copy)]
pub enum ConfigFile<'a> {
    /// No file layer
    None,
    /// The conventional location; a missing file is fine
    Default(&'a Path),
    /// Named by the operator; it must exist
    Explicit(&'a Path),
}

/// Merge defaults < configuration file < environment < CLI flags into a
/// snapshot. Relative paths in the file are anchored at the file's directory,
/// relative paths in the environment and flags at `base_dir`.
pub fn resolve(
    defaults: PartialConfig,
    config_file: ConfigFile<'_>,
    environment: &HashMap<String, String>,
    cli: PartialConfig,
    base_dir: &Path,
) -> Result<ConfigSnapshot, ConfigError> {
    let file_layer = match config_file {
        ConfigFile::None => PartialConfig::default(),
        ConfigFile::Default(path) if !path.exists() => {
            log::debug!("No configuration file at {}, using defaults", path.display());
            PartialConfig::default()
        }
        ConfigFile::Default(path) | ConfigFile::Explicit(path) => {
            if !path.exists() {
                return Err(ConfigError::ConfigFileNotFound(path.to_path_buf()));
            }
            log::debug!("Loading configuration from {}", path.display());
            let file_dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(base_dir);
            PartialConfig::from_file(path)?.anchored(&base_dir.join(file_dir))
        }
    };

    defaults
        .anchored(base_dir)
        .merge(file_layer)
        .merge(PartialConfig::from_env(environment)?.anchored(base_dir))
        .merge(cli.anchored(base_dir))
        .finish()
}
