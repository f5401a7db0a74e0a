use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `kiln` rooted in a scratch directory, isolated from the caller's settings
fn kiln(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("ROCM_PATH")
        .env_remove("GFX_TARGET")
        .env_remove("RUST_LOG")
        .env("KILN_INSTALL_ROOT", dir.path().join("rocm"))
        .env("KILN_WORKSPACE", dir.path().join("ws"))
        .env("KILN_NON_INTERACTIVE", "1");
    cmd
}

#[test]
fn test_help_lists_every_stage() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install-runtime"))
        .stdout(predicate::str::contains("build-artifact"))
        .stdout(predicate::str::contains("list-nightly"));
    Ok(())
}

#[test]
fn test_missing_subcommand_is_a_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir).assert().code(2);
    Ok(())
}

#[test]
fn test_conflicting_build_modes_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir).args(["build-artifact", "--build-only", "--clean"]).assert().code(2);
    Ok(())
}

#[test]
fn test_unknown_resume_stage_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir)
        .args(["run", "--from", "bogus"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("bogus"));
    Ok(())
}

#[test]
fn test_relative_install_root_is_a_configuration_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir)
        .env("KILN_INSTALL_ROOT", "relative/rocm")
        .arg("status")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absolute"));
    Ok(())
}

#[test]
fn test_validate_with_missing_binary_exits_2() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let model = dir.path().join("tiny.gguf");
    std::fs::write(&model, b"GGUF")?;
    kiln(&dir)
        .arg("validate")
        .arg(dir.path().join("no-such-binary"))
        .arg(&model)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("binary"));
    Ok(())
}

#[test]
fn test_restore_without_archive_exits_1() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir)
        .args(["package", "--restore"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("archive"));
    Ok(())
}

#[test]
fn test_dry_run_touches_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir)
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would"));
    assert!(!dir.path().join("rocm").exists());
    assert!(!dir.path().join("ws").exists());
    Ok(())
}

#[test]
fn test_status_reports_pending_stages() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    kiln(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("pending"))
        .stdout(predicate::str::contains("absent"));
    Ok(())
}
