use std::fmt;
use std::path::{Path, PathBuf};

use crate::install::error::InstallError;
use crate::utils::{path_occupied, remove_path, sibling};

/// Where an installed tree currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Absent,
    Live,
    /// Only the archived full copy exists
    Archived,
    /// A trimmed tree is live and the full copy is archived next to it
    LiveWithArchive,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Absent => write!(f, "absent"),
            RecordState::Live => write!(f, "live"),
            RecordState::Archived => write!(f, "archived"),
            RecordState::LiveWithArchive => write!(f, "live (archive kept)"),
        }
    }
}

/// A canonical path and the sibling locations used while replacing it.
///
/// For `/opt/rocm` these are `/opt/rocm.bak` (backup held during a stage),
/// `/opt/rocm.archive` (full runtime kept by packaging) and
/// `/opt/rocm.staging` (tree being assembled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationRecord {
    canonical: PathBuf,
}

impl InstallationRecord {
    pub fn new(canonical: impl Into<PathBuf>) -> Self {
        Self { canonical: canonical.into() }
    }

    pub fn canonical(&self) -> &Path {
        &self.canonical
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.canonical, ".bak")
    }

    pub fn archive_path(&self) -> PathBuf {
        sibling(&self.canonical, ".archive")
    }

    pub fn staging_path(&self) -> PathBuf {
        sibling(&self.canonical, ".staging")
    }

    pub fn state(&self) -> RecordState {
        match (path_occupied(&self.canonical), path_occupied(self.archive_path())) {
            (false, false) => RecordState::Absent,
            (true, false) => RecordState::Live,
            (false, true) => RecordState::Archived,
            (true, true) => RecordState::LiveWithArchive,
        }
    }

    /// A backup left behind by a run that never committed or restored
    pub fn has_stale_backup(&self) -> bool {
        path_occupied(self.backup_path())
    }

    /// Repair what an interrupted run left behind.
    ///
    /// A stale backup with nothing live is put back. A stale backup next to a
    /// live tree is ambiguous and refused.
    pub fn recover(&self) -> Result<(), InstallError> {
        let staging = self.staging_path();
        if path_occupied(&staging) {
            log::warn!("Removing leftover staging tree {}", staging.display());
            remove_path(&staging).map_err(InstallError::io(&staging))?;
        }

        if !self.has_stale_backup() {
            return Ok(());
        }
        let backup = self.backup_path();
        if path_occupied(&self.canonical) {
            return Err(InstallError::BackupRestoreFailed {
                path: self.canonical.clone(),
                reason: format!(
                    "both '{}' and a stale backup '{}' exist; remove one of them",
                    self.canonical.display(),
                    backup.display()
                ),
            });
        }
        log::warn!("Restoring stale backup {} to {}", backup.display(), self.canonical.display());
        std::fs::rename(&backup, &self.canonical).map_err(|e| InstallError::BackupRestoreFailed {
            path: self.canonical.clone(),
            reason: e.to_string(),
        })
    }

    /// Move the live tree (if any) aside and return the guard that either
    /// commits the replacement or puts the old tree back.
    pub fn begin_replace(&self) -> Result<BackupGuard, InstallError> {
        let backup = self.backup_path();
        let had_previous = path_occupied(&self.canonical);
        if had_previous {
            if path_occupied(&backup) {
                return Err(InstallError::BackupFailed {
                    path: self.canonical.clone(),
                    backup,
                    source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "backup path is occupied"),
                });
            }
            std::fs::rename(&self.canonical, &backup).map_err(|source| InstallError::BackupFailed {
                path: self.canonical.clone(),
                backup: backup.clone(),
                source,
            })?;
            log::debug!("Moved {} aside to {}", self.canonical.display(), backup.display());
        }
        Ok(BackupGuard {
            canonical: self.canonical.clone(),
            backup,
            had_previous,
            resolved: false,
        })
    }

    /// Replace the live tree with `staging`, keeping the old live tree as
    /// the archive. An archive that already exists is kept and the live tree
    /// is discarded instead, so the archive always holds the original.
    /// With `keep_archive = false` the archive is deleted once the swap
    /// succeeds.
    pub fn archive_and_replace(&self, staging: &Path, keep_archive: bool) -> Result<(), InstallError> {
        if !path_occupied(&self.canonical) {
            return Err(InstallError::Io {
                path: self.canonical.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "nothing installed to archive"),
            });
        }
        let archive = self.archive_path();
        let archive_existed = path_occupied(&archive);
        let aside = if archive_existed { self.backup_path() } else { archive.clone() };
        if path_occupied(&aside) {
            return Err(InstallError::BackupFailed {
                path: self.canonical.clone(),
                backup: aside,
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "path is occupied"),
            });
        }

        std::fs::rename(&self.canonical, &aside).map_err(|source| InstallError::BackupFailed {
            path: self.canonical.clone(),
            backup: aside.clone(),
            source,
        })?;
        if let Err(e) = std::fs::rename(staging, &self.canonical) {
            std::fs::rename(&aside, &self.canonical).map_err(|re| InstallError::BackupRestoreFailed {
                path: self.canonical.clone(),
                reason: re.to_string(),
            })?;
            return Err(InstallError::Io { path: staging.to_path_buf(), source: e });
        }

        if archive_existed {
            remove_path(&aside).map_err(InstallError::io(&aside))?;
        }
        if keep_archive {
            log::info!("Full tree archived at {}", archive.display());
        } else {
            remove_path(&archive).map_err(InstallError::io(&archive))?;
            log::info!("Full tree discarded");
        }
        Ok(())
    }

    /// Put the archived full tree back at the canonical path
    pub fn restore_archive(&self) -> Result<(), InstallError> {
        let archive = self.archive_path();
        if !path_occupied(&archive) {
            return Err(InstallError::ArchiveMissing(archive));
        }
        let guard = self.begin_replace()?;
        match std::fs::rename(&archive, &self.canonical) {
            Ok(()) => guard.commit(),
            Err(e) => {
                guard.restore()?;
                Err(InstallError::Io { path: archive, source: e })
            }
        }
    }
}

/// Scoped backup of a canonical path.
///
/// Resolve it with [`commit`](Self::commit) or [`restore`](Self::restore).
/// Dropping it unresolved restores, so an early return or a panic never
/// leaves the canonical path half-replaced.
#[derive(Debug)]
#[must_use = "an unresolved backup is restored when dropped"]
pub struct BackupGuard {
    canonical: PathBuf,
    backup: PathBuf,
    had_previous: bool,
    resolved: bool,
}

impl BackupGuard {
    /// Whether a previous tree was moved aside
    pub fn has_backup(&self) -> bool {
        self.had_previous
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    /// Keep the new state and delete the backup
    pub fn commit(mut self) -> Result<(), InstallError> {
        self.resolved = true;
        if self.had_previous {
            remove_path(&self.backup).map_err(InstallError::io(&self.backup))?;
            log::debug!("Committed {}, backup removed", self.canonical.display());
        }
        Ok(())
    }

    /// Discard whatever is at the canonical path and put the backup back
    pub fn restore(mut self) -> Result<(), InstallError> {
        self.resolved = true;
        self.restore_inner()
    }

    fn restore_inner(&self) -> Result<(), InstallError> {
        let failed = |reason: String| InstallError::BackupRestoreFailed { path: self.canonical.clone(), reason };
        remove_path(&self.canonical).map_err(|e| failed(format!("could not clear partial state: {}", e)))?;
        if self.had_previous {
            std::fs::rename(&self.backup, &self.canonical).map_err(|e| failed(e.to_string()))?;
            log::info!("Restored {} from backup", self.canonical.display());
        }
        Ok(())
    }
}

impl Drop for BackupGuard {
    fn drop(&mut self) {
        if !self.resolved {
            if let Err(e) = self.restore_inner() {
                log::error!("{}", e);
            }
        }
    }
}
