use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::tempdir;

use crate::config::{ConfigError, ConfigFile, PartialConfig, resolve};

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn resolve_with(
    base: &Path,
    file: ConfigFile<'_>,
    environment: &HashMap<String, String>,
    cli: PartialConfig,
) -> Result<crate::config::ConfigSnapshot, ConfigError> {
    resolve(PartialConfig::builtin(base), file, environment, cli, base)
}

#[test]
fn test_defaults_only() {
    let dir = tempdir().unwrap();
    let snapshot = resolve_with(dir.path(), ConfigFile::None, &HashMap::new(), PartialConfig::default()).unwrap();

    assert_eq!(snapshot.install_root, PathBuf::from("/opt/rocm"));
    assert_eq!(snapshot.workspace, dir.path().join("workspace"));
    assert_eq!(snapshot.cache_dir, dir.path().join("workspace").join("cache"));
    assert_eq!(snapshot.artifact_dir, dir.path().join("workspace").join("llama-install"));
    assert_eq!(snapshot.gpu_target, "gfx1151");
    assert_eq!(snapshot.state_dir(), dir.path().join("workspace").join(".kiln"));
    assert!(!snapshot.force);
    assert!(!snapshot.non_interactive);
    assert_eq!(snapshot.timeouts.build, Duration::from_secs(3 * 60 * 60));
}

#[test]
fn test_layer_precedence_file_env_cli() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("kiln.toml");
    std::fs::write(
        &file,
        "install_root = \"/from/file\"\ngpu_target = \"gfx1100\"\nllama_ref = \"b1234\"\nplatform = \"windows\"\n",
    )
    .unwrap();

    let environment = env(&[("KILN_INSTALL_ROOT", "/from/env"), ("KILN_GPU_TARGET", "gfx1201")]);
    let cli = PartialConfig {
        install_root: Some(PathBuf::from("/from/cli")),
        ..PartialConfig::default()
    };

    let snapshot = resolve_with(dir.path(), ConfigFile::Explicit(&file), &environment, cli).unwrap();

    // CLI beats env beats file beats defaults
    assert_eq!(snapshot.install_root, PathBuf::from("/from/cli"));
    assert_eq!(snapshot.gpu_target, "gfx1201");
    assert_eq!(snapshot.llama_ref, "b1234");
    assert_eq!(snapshot.platform, "windows");
    assert_eq!(snapshot.llama_repo, "https://github.com/ggml-org/llama.cpp.git");
}

#[test]
fn test_env_fallback_names() {
    let dir = tempdir().unwrap();
    let environment = env(&[("ROCM_PATH", "/opt/rocm-7"), ("GFX_TARGET", "gfx1150")]);
    let snapshot = resolve_with(dir.path(), ConfigFile::None, &environment, PartialConfig::default()).unwrap();
    assert_eq!(snapshot.install_root, PathBuf::from("/opt/rocm-7"));
    assert_eq!(snapshot.gpu_target, "gfx1150");

    // The kiln-specific name wins over the fallback
    let environment = env(&[("ROCM_PATH", "/opt/rocm-7"), ("KILN_INSTALL_ROOT", "/srv/rocm")]);
    let snapshot = resolve_with(dir.path(), ConfigFile::None, &environment, PartialConfig::default()).unwrap();
    assert_eq!(snapshot.install_root, PathBuf::from("/srv/rocm"));
}

#[test]
fn test_empty_install_root_is_rejected() {
    let dir = tempdir().unwrap();
    let cli = PartialConfig {
        install_root: Some(PathBuf::new()),
        ..PartialConfig::default()
    };
    let err = resolve_with(dir.path(), ConfigFile::None, &HashMap::new(), cli).unwrap_err();
    assert!(matches!(err, ConfigError::MissingInstallRoot));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_relative_install_root_is_rejected() {
    let dir = tempdir().unwrap();
    let environment = env(&[("KILN_INSTALL_ROOT", "rocm")]);
    let err = resolve_with(dir.path(), ConfigFile::None, &environment, PartialConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::RelativePath { key: "install_root", .. }));
}

#[test]
fn test_relative_workspace_is_anchored() {
    let dir = tempdir().unwrap();
    let cli = PartialConfig {
        workspace: Some(PathBuf::from("ws")),
        ..PartialConfig::default()
    };
    let snapshot = resolve_with(dir.path(), ConfigFile::None, &HashMap::new(), cli).unwrap();
    assert_eq!(snapshot.workspace, dir.path().join("ws"));
    assert_eq!(snapshot.build_dir(), dir.path().join("ws").join("build").join("llama.cpp"));
}

#[test]
fn test_file_paths_are_relative_to_the_file() {
    let dir = tempdir().unwrap();
    let conf_dir = dir.path().join("conf");
    std::fs::create_dir_all(&conf_dir).unwrap();
    let file = conf_dir.join("kiln.json");
    std::fs::write(&file, r#"{ "workspace": "ws", "model_path": "/models/tiny.gguf" }"#).unwrap();

    let snapshot = resolve_with(dir.path(), ConfigFile::Explicit(&file), &HashMap::new(), PartialConfig::default()).unwrap();
    assert_eq!(snapshot.workspace, conf_dir.join("ws"));
    assert_eq!(snapshot.model_path, Some(PathBuf::from("/models/tiny.gguf")));
}

#[test]
fn test_missing_default_file_is_fine() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("kiln.toml");
    assert!(resolve_with(dir.path(), ConfigFile::Default(&file), &HashMap::new(), PartialConfig::default()).is_ok());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("absent.toml");
    let err = resolve_with(dir.path(), ConfigFile::Explicit(&file), &HashMap::new(), PartialConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigFileNotFound(_)));
}

#[test]
fn test_unknown_file_key_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("kiln.toml");
    std::fs::write(&file, "instal_root = \"/typo\"\n").unwrap();
    let err = resolve_with(dir.path(), ConfigFile::Explicit(&file), &HashMap::new(), PartialConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));
}

#[test]
fn test_env_flags_and_timeouts() {
    let environment = env(&[
        ("KILN_NON_INTERACTIVE", "yes"),
        ("KILN_FORCE", "0"),
        ("KILN_BUILD_TIMEOUT", "42"),
    ]);
    let layer = PartialConfig::from_env(&environment).unwrap();
    assert_eq!(layer.non_interactive, Some(true));
    assert_eq!(layer.force, Some(false));
    assert_eq!(layer.build_timeout_secs, Some(42));
    assert_eq!(layer.command_timeout_secs, None);
}

#[test]
fn test_invalid_env_values() {
    let err = PartialConfig::from_env(&env(&[("KILN_FORCE", "maybe")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "KILN_FORCE"));

    let err = PartialConfig::from_env(&env(&[("KILN_COMMAND_TIMEOUT", "0")])).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "KILN_COMMAND_TIMEOUT"));
}

#[test]
fn test_blank_env_values_are_ignored() {
    let layer = PartialConfig::from_env(&env(&[("KILN_INSTALL_ROOT", "  "), ("KILN_FORCE", "")])).unwrap();
    assert_eq!(layer, PartialConfig::default());
}

#[test]
fn test_toolchain_env() {
    let dir = tempdir().unwrap();
    let environment = env(&[("KILN_INSTALL_ROOT", "/opt/rocm")]);
    let snapshot = resolve_with(dir.path(), ConfigFile::None, &environment, PartialConfig::default()).unwrap();
    let vars: HashMap<String, String> = snapshot.toolchain_env(Some("/usr/bin")).into_iter().collect();

    assert_eq!(vars["ROCM_PATH"], "/opt/rocm");
    assert_eq!(vars["HIP_PLATFORM"], "amd");
    assert_eq!(vars["PATH"], "/opt/rocm/bin:/usr/bin");
    assert!(vars["LD_LIBRARY_PATH"].starts_with("/opt/rocm/lib:/opt/rocm/lib64:"));
}
