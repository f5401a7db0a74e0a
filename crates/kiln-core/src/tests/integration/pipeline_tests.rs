use std::sync::Arc;

use tempfile::tempdir;

use super::common::{REVISION, pipeline_context};
use crate::archive::tests::mock_client::MockClient;
use crate::install::{InstallationRecord, RecordState, VersionMarker};
use crate::stage_manager::core_stages::markers;
use crate::stage_manager::{
    PipelineStatus, StageKind, StageOptions, StagePipeline, StageStatus, default_stages,
};

#[tokio::test]
async fn test_full_run_then_rerun_is_all_skips() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockClient::new());
    let ctx = pipeline_context(dir.path(), client.clone());
    let stages = default_stages(&StageOptions::default());
    let config = ctx.config();

    let first = StagePipeline::run(&ctx, &stages, None).await;
    assert_eq!(first.status, PipelineStatus::Succeeded, "{:#?}", first.results);
    let statuses: Vec<_> = first.results.iter().map(|r| (r.kind, r.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (StageKind::Provision, StageStatus::Succeeded),
            (StageKind::InstallRuntime, StageStatus::Succeeded),
            (StageKind::BuildArtifact, StageStatus::Succeeded),
            (StageKind::Validate, StageStatus::Skipped),
            (StageKind::Package, StageStatus::Succeeded),
        ]
    );

    let artifact = VersionMarker::read(&config.artifact_dir, markers::ARTIFACT).unwrap().unwrap();
    assert_eq!(artifact.version, REVISION);
    assert!(config.artifact_dir.join("bin").join("llama-server").is_file());
    assert_eq!(InstallationRecord::new(&config.install_root).state(), RecordState::LiveWithArchive);
    assert!(config.install_root.join("lib").join("libamdhip64.so.7").is_file());

    let second = StagePipeline::run(&ctx, &stages, None).await;
    assert_eq!(second.status, PipelineStatus::Succeeded);
    assert!(second.results.iter().all(|r| r.skipped()), "{:#?}", second.results);
    assert_eq!(client.fetches(), 1);
}

#[tokio::test]
async fn test_resume_from_runtime_after_download_failure() {
    let dir = tempdir().unwrap();
    let client = Arc::new(MockClient::new());
    let ctx = pipeline_context(dir.path(), client.clone());
    let stages = default_stages(&StageOptions::default());
    let root = ctx.config().install_root.clone();

    // The runtime never arrives, so the build must not start
    client.truncate(Some(10));
    let failed = StagePipeline::run(&ctx, &stages, None).await;
    assert_eq!(failed.status, PipelineStatus::Failed);
    assert_eq!(failed.first_failure().map(|r| r.kind), Some(StageKind::InstallRuntime));
    assert!(!failed.attempted(StageKind::BuildArtifact));
    assert!(!root.exists());

    client.truncate(None);
    let resumed = StagePipeline::run(&ctx, &stages, Some(StageKind::InstallRuntime)).await;
    assert_eq!(resumed.status, PipelineStatus::Succeeded, "{:#?}", resumed.results);
    assert_eq!(resumed.results[0].reason.as_deref(), Some("resume"));
    assert!(root.join(".kiln").join("package.json").is_file());
}
