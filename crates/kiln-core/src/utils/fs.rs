use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Find files recursively in a directory that match a predicate.
/// Symlinks are reported, never followed.
pub fn find_files<P, F>(path: P, predicate: &F) -> io::Result<Vec<PathBuf>>
where
    P: AsRef<Path>,
    F: Fn(&Path) -> bool + ?Sized,
{
    let mut result = Vec::new();
    let path = path.as_ref();

    let meta = match path.symlink_metadata() {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(result),
        Err(e) => return Err(e),
    };

    if !meta.is_dir() {
        if predicate(path) {
            result.push(path.to_path_buf());
        }
        return Ok(result);
    }

    let mut entries = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let mut sub_results = find_files(entry.path(), predicate)?;
        result.append(&mut sub_results);
    }

    Ok(result)
}

/// Files under `path` that are executables or shared objects
pub fn find_binaries<P: AsRef<Path>>(path: P) -> io::Result<Vec<PathBuf>> {
    find_files(path, &|p: &Path| {
        let is_regular = p.symlink_metadata().map(|m| m.file_type().is_file()).unwrap_or(false);
        is_regular && (super::is_executable(p) || is_shared_object(p))
    })
}

/// `libfoo.so`, `libfoo.so.7`, `libfoo.so.7.0.1`
pub fn is_shared_object(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let name = n.to_string_lossy();
            name.ends_with(".so") || name.contains(".so.")
        })
        .unwrap_or(false)
}

/// Copy one entry to `to`, creating parents. Symlinks are recreated as
/// symlinks with the same target.
pub fn copy_entry<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    let meta = from.symlink_metadata()?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(from)?;
        super::remove_path(to)?;
        std::os::unix::fs::symlink(target, to)
    } else if meta.is_dir() {
        copy_dir_all(from, to)
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

/// Recursively copy a directory tree
pub fn copy_dir_all<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        copy_entry(entry.path(), to.join(entry.file_name()))?;
    }
    Ok(())
}

/// Write `content` to `path` through a temporary file in the same directory
/// and a rename, so readers never see a partial file.
pub fn write_atomic<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> io::Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_ref())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
