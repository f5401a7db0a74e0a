use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use crate::utils::{path_occupied, remove_path, sibling};

#[test]
fn test_sibling() {
    assert_eq!(sibling("/opt/rocm", ".bak"), PathBuf::from("/opt/rocm.bak"));
    assert_eq!(sibling(Path::new("/opt/rocm-7.0"), ".archive"), PathBuf::from("/opt/rocm-7.0.archive"));
}

#[test]
fn test_remove_path_variants() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("file");
    let tree = dir.path().join("tree");
    let dangling = dir.path().join("dangling");
    fs::write(&file, b"x").unwrap();
    fs::create_dir_all(tree.join("a/b")).unwrap();
    symlink(dir.path().join("nowhere"), &dangling).unwrap();

    assert!(path_occupied(&dangling));
    for path in [&file, &tree, &dangling] {
        remove_path(path).unwrap();
        assert!(!path_occupied(path));
    }
    // Absent is fine
    remove_path(dir.path().join("never-existed")).unwrap();
}
