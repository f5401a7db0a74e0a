use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::tempdir;

use crate::config::PartialConfig;
use crate::install::InstallationRecord;
use crate::kernel::exit_code;
use crate::stage_manager::tests::fixture::{context_at, tree};
use crate::stage_manager::{
    ExecutionMode, Readiness, Stage, StageContext, StageError, StageExecutor, StageKind, StageStatus,
};

/// Writes `new-tree` into its canonical path, then optionally fails
struct ReplacingStage {
    canonical: PathBuf,
    readiness: Readiness,
    fail: bool,
    checks: AtomicUsize,
    executions: AtomicUsize,
}

impl ReplacingStage {
    fn new(canonical: PathBuf, readiness: Readiness, fail: bool) -> Self {
        Self { canonical, readiness, fail, checks: AtomicUsize::new(0), executions: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Stage for ReplacingStage {
    fn kind(&self) -> StageKind {
        StageKind::InstallRuntime
    }

    fn description(&self) -> &str {
        "replace a tree"
    }

    fn canonical_path(&self, _context: &StageContext) -> Option<PathBuf> {
        Some(self.canonical.clone())
    }

    async fn check(&self, _context: &StageContext) -> Result<Readiness, StageError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.readiness.clone())
    }

    async fn execute(&self, _context: &StageContext) -> Result<(), StageError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(self.canonical.join("lib")).unwrap();
        std::fs::write(self.canonical.join("lib").join("new.so"), "half written").unwrap();
        if self.fail {
            return Err(StageError::VerificationFailed { reason: "boom".to_string(), diagnostics: "tail".to_string() });
        }
        std::fs::write(self.canonical.join("VERSION"), "new").unwrap();
        Ok(())
    }
}

fn seed(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("lib")).unwrap();
    std::fs::write(root.join("VERSION"), "old").unwrap();
    std::fs::write(root.join("lib").join("old.so"), "old library").unwrap();
    std::os::unix::fs::symlink("old.so", root.join("lib").join("libold.so")).unwrap();
}

#[tokio::test]
async fn test_satisfied_stage_is_skipped_without_acting() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig::default());
    let stage = ReplacingStage::new(dir.path().join("root"), Readiness::Satisfied("present".to_string()), false);

    let result = StageExecutor::execute(&stage, &ctx).await;

    assert_eq!(result.status, StageStatus::Skipped);
    assert_eq!(result.reason.as_deref(), Some("present"));
    assert_eq!(stage.executions.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("root").exists());
}

#[tokio::test]
async fn test_force_acts_on_satisfied_stage() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig { force: Some(true), ..PartialConfig::default() });
    let root = dir.path().join("root");
    seed(&root);
    let stage = ReplacingStage::new(root.clone(), Readiness::Satisfied("present".to_string()), false);

    let result = StageExecutor::execute(&stage, &ctx).await;

    assert!(result.succeeded());
    assert_eq!(std::fs::read_to_string(root.join("VERSION")).unwrap(), "new");
    // The old tree was replaced, not merged into
    assert!(!root.join("lib").join("old.so").exists());
    assert!(!InstallationRecord::new(&root).has_stale_backup());
}

#[tokio::test]
async fn test_not_applicable_is_skipped_even_when_forced() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig::default());
    let stage = ReplacingStage::new(dir.path().join("root"), Readiness::NotApplicable("no model".to_string()), false);

    let result = StageExecutor::execute_with(&stage, &ctx, true).await;

    assert!(result.skipped());
    assert_eq!(stage.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_act_leaves_canonical_path_unchanged() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig::default());
    let root = dir.path().join("root");
    seed(&root);
    let before = tree(&root);
    let stage = ReplacingStage::new(root.clone(), Readiness::Pending, true);

    let result = StageExecutor::execute(&stage, &ctx).await;

    assert!(result.failed());
    assert_eq!(result.exit_code(), exit_code::VERIFICATION_FAILED);
    assert_eq!(result.error.as_ref().and_then(|e| e.diagnostics()), Some("tail"));
    assert_eq!(tree(&root), before);
    assert!(!InstallationRecord::new(&root).has_stale_backup());
}

#[tokio::test]
async fn test_failed_act_on_absent_path_removes_partial_state() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig::default());
    let root = dir.path().join("root");
    let stage = ReplacingStage::new(root.clone(), Readiness::Pending, true);

    let result = StageExecutor::execute(&stage, &ctx).await;

    assert!(result.failed());
    assert!(!root.exists());
}

#[tokio::test]
async fn test_stale_backup_is_recovered_before_acting() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig::default());
    let root = dir.path().join("root");
    let record = InstallationRecord::new(&root);
    seed(&record.backup_path());
    let stage = ReplacingStage::new(root.clone(), Readiness::Pending, true);

    let result = StageExecutor::execute(&stage, &ctx).await;

    // The interrupted run's tree is back in place after the failed retry
    assert!(result.failed());
    assert_eq!(std::fs::read_to_string(root.join("VERSION")).unwrap(), "old");
    assert!(!record.has_stale_backup());
}

#[tokio::test]
async fn test_ambiguous_backup_fails_without_acting() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig::default());
    let root = dir.path().join("root");
    seed(&root);
    seed(&InstallationRecord::new(&root).backup_path());
    let stage = ReplacingStage::new(root.clone(), Readiness::Pending, false);

    let result = StageExecutor::execute(&stage, &ctx).await;

    assert!(result.failed());
    assert_eq!(result.exit_code(), exit_code::RESTORE_FAILED);
    assert_eq!(stage.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dry_run_neither_checks_nor_acts() {
    let dir = tempdir().unwrap();
    let ctx = context_at(dir.path(), PartialConfig::default()).with_mode(ExecutionMode::DryRun);
    let stage = ReplacingStage::new(dir.path().join("root"), Readiness::Pending, false);

    let result = StageExecutor::execute(&stage, &ctx).await;

    assert!(result.skipped());
    assert_eq!(result.reason.as_deref(), Some("Would execute stage: install-runtime"));
    assert_eq!(stage.checks.load(Ordering::SeqCst), 0);
    assert_eq!(stage.executions.load(Ordering::SeqCst), 0);
}
