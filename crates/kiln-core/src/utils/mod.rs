pub mod fs;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// `<path><suffix>`, e.g. `/opt/rocm` + `.bak` -> `/opt/rocm.bak`
pub fn sibling<P: AsRef<Path>>(path: P, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_ref().as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Whether anything (file, directory or dangling symlink) occupies `path`
pub fn path_occupied<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().symlink_metadata().is_ok()
}

/// Remove whatever occupies `path`. Absent paths are fine.
pub fn remove_path<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let path = path.as_ref();
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Check if a path names a regular file with an execute bit set
pub fn is_executable<P: AsRef<Path>>(path: P) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.as_ref()
        .metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Current time as seconds since the Unix epoch
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
