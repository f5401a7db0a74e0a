use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use crate::archive::tests::mock_client::MockClient;
use crate::command::CancelSignal;
use crate::config::PartialConfig;
use crate::install::VersionMarker;
use crate::kernel::exit_code;
use crate::stage_manager::core_stages::{InstallRuntimeStage, RuntimeMode, RuntimeOptions, markers};
use crate::stage_manager::tests::fixture::{cancellable_context, context, runtime_archive, snapshot, tree};
use crate::stage_manager::{Readiness, Stage, StageExecutor, StageStatus};
use crate::utils;

const URL: &str = "https://example.invalid/therock-dist-linux-gfx1151-7.0.0.tar.gz";
const BROKEN_URL: &str = "https://example.invalid/therock-dist-linux-gfx1151-broken.tar.gz";
const SLOW_URL: &str = "https://example.invalid/therock-dist-linux-gfx1151-7.0.1.tar.gz";

fn overrides() -> PartialConfig {
    PartialConfig { rocm_url: Some(URL.to_string()), ..PartialConfig::default() }
}

fn full() -> InstallRuntimeStage {
    InstallRuntimeStage::new(RuntimeOptions::default())
}

#[tokio::test]
async fn test_install_runtime_then_second_run_is_skipped() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockClient::new());
    client.serve(URL, runtime_archive("echo 7.0.0-test"));
    let ctx = context(snapshot(dir.path(), overrides()), client.clone());
    let config = ctx.config();

    let first = StageExecutor::execute(&full(), &ctx).await;
    assert!(first.succeeded(), "{}", first);

    // The single top-level directory is flattened onto the root
    assert!(utils::is_executable(config.install_root.join("bin").join("hipconfig")));
    assert!(config.install_root.join("lib").join("libamdhip64.so.7").is_file());
    let script = std::fs::read_to_string(config.env_script()).unwrap();
    assert!(script.contains(&format!("export ROCM_PATH=\"{}\"", config.install_root.display())));
    let marker = VersionMarker::read(&config.install_root, markers::RUNTIME).unwrap().unwrap();
    assert_eq!(marker.version, URL);
    assert_eq!(marker.target.as_deref(), Some("gfx1151"));

    let second = StageExecutor::execute(&full(), &ctx).await;
    assert!(second.skipped(), "{}", second);
    assert_eq!(client.fetches(), 1);
}

#[tokio::test]
async fn test_broken_archive_restores_previous_runtime() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockClient::new());
    client.serve(URL, runtime_archive("echo 7.0.0-test"));
    client.serve(BROKEN_URL, b"this is not a tarball".to_vec());
    let ctx = context(snapshot(dir.path(), overrides()), client.clone());
    let root = ctx.config().install_root.clone();

    assert!(StageExecutor::execute(&full(), &ctx).await.succeeded());
    let before = tree(&root);

    let broken = InstallRuntimeStage::new(RuntimeOptions { url: Some(BROKEN_URL.to_string()), ..Default::default() });
    let result = StageExecutor::execute_with(&broken, &ctx, true).await;

    assert!(result.failed());
    assert_eq!(result.exit_code(), exit_code::VERIFICATION_FAILED);
    assert_eq!(tree(&root), before);
    assert!(!utils::path_occupied(utils::sibling(&root, ".staging")));
    assert!(!utils::path_occupied(utils::sibling(&root, ".bak")));
}

#[tokio::test]
async fn test_interrupt_during_verification_restores_previous_runtime() {
    let dir = tempdir().unwrap();
    let started = dir.path().join("hipconfig-started");
    let client = Arc::new(MockClient::new());
    client.serve(URL, runtime_archive("echo 7.0.0-test"));
    client.serve(SLOW_URL, runtime_archive(&format!("touch '{}'; sleep 30", started.display())));
    let cancel = CancelSignal::new();
    let ctx = cancellable_context(snapshot(dir.path(), overrides()), client.clone(), cancel.clone());
    let root = ctx.config().install_root.clone();

    assert!(StageExecutor::execute(&full(), &ctx).await.succeeded());
    let before = tree(&root);

    // Fire the signal once the new runtime's hipconfig is running
    tokio::spawn(async move {
        for _ in 0..500 {
            if started.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
    });
    let newer = InstallRuntimeStage::new(RuntimeOptions { url: Some(SLOW_URL.to_string()), ..Default::default() });
    let result = StageExecutor::execute_with(&newer, &ctx, true).await;

    assert_eq!(result.status, StageStatus::Failed);
    assert_eq!(result.exit_code(), exit_code::INTERRUPTED);
    assert_eq!(tree(&root), before);
    assert!(!utils::path_occupied(utils::sibling(&root, ".bak")));
    assert!(!utils::path_occupied(utils::sibling(&root, ".staging")));
}

#[tokio::test]
async fn test_failing_verification_leaves_no_partial_install() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockClient::new());
    client.serve(URL, runtime_archive("echo 'libamdhip64.so: cannot open' >&2; exit 1"));
    let ctx = context(snapshot(dir.path(), overrides()), client);

    let result = StageExecutor::execute(&full(), &ctx).await;

    assert!(result.failed());
    assert_eq!(result.exit_code(), exit_code::VERIFICATION_FAILED);
    assert!(result.error.as_ref().and_then(|e| e.diagnostics()).unwrap().contains("cannot open"));
    assert!(!ctx.config().install_root.exists());
}

#[tokio::test]
async fn test_download_failure_maps_to_download_exit_code() {
    let dir = tempdir().unwrap();
    let ctx = context(snapshot(dir.path(), overrides()), Arc::new(MockClient::new()));

    let result = StageExecutor::execute(&full(), &ctx).await;

    assert!(result.failed());
    assert_eq!(result.exit_code(), exit_code::DOWNLOAD_FAILED);
}

#[tokio::test]
async fn test_configure_only_needs_an_installed_root() {
    let dir = tempdir().unwrap();
    let ctx = context(snapshot(dir.path(), overrides()), Arc::new(MockClient::new()));
    let stage = InstallRuntimeStage::new(RuntimeOptions { mode: RuntimeMode::ConfigureOnly, ..Default::default() });

    let missing = StageExecutor::execute(&stage, &ctx).await;
    assert_eq!(missing.exit_code(), exit_code::TOOLCHAIN_MISSING);

    std::fs::create_dir_all(&ctx.config().install_root).unwrap();
    assert!(StageExecutor::execute(&stage, &ctx).await.succeeded());
    assert!(matches!(stage.check(&ctx).await.unwrap(), Readiness::Satisfied(_)));
}

#[tokio::test]
async fn test_verify_only_is_never_satisfied() {
    let dir = tempdir().unwrap();
    let ctx = context(snapshot(dir.path(), overrides()), Arc::new(MockClient::new()));
    let stage = InstallRuntimeStage::new(RuntimeOptions { mode: RuntimeMode::VerifyOnly, ..Default::default() });

    assert_eq!(stage.check(&ctx).await.unwrap(), Readiness::Pending);
    let result = StageExecutor::execute(&stage, &ctx).await;
    assert_eq!(result.exit_code(), exit_code::VERIFICATION_FAILED);
}
