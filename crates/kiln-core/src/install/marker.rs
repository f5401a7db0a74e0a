use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::install::error::InstallError;
use crate::kernel::constants::STATE_DIR_NAME;
use crate::utils::{self, fs::write_atomic};

/// Record of what is installed at a path, read by idempotency checks.
///
/// Stored as `<base>/.kiln/<component>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub component: String,
    /// Archive identity, source revision, or model path, depending on the component
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Seconds since the Unix epoch
    pub installed_at: u64,
}

impl VersionMarker {
    pub fn new(component: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            version: version.into(),
            reference: None,
            target: None,
            installed_at: utils::unix_now(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn path(base: &Path, component: &str) -> PathBuf {
        base.join(STATE_DIR_NAME).join(format!("{}.json", component))
    }

    /// Write the marker under `base`, replacing any previous one atomically
    pub fn write(&self, base: &Path) -> Result<PathBuf, InstallError> {
        let path = Self::path(base, &self.component);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| InstallError::Marker { path: path.clone(), reason: e.to_string() })?;
        write_atomic(&path, json).map_err(InstallError::io(&path))?;
        log::debug!("Wrote {} marker at {}", self.component, path.display());
        Ok(path)
    }

    /// Read the marker for `component` under `base`, if there is one
    pub fn read(base: &Path, component: &str) -> Result<Option<Self>, InstallError> {
        let path = Self::path(base, component);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(InstallError::Io { path, source: e }),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| InstallError::Marker { path, reason: e.to_string() })
    }

    /// Like [`read`](Self::read), but an unreadable marker counts as absent
    pub fn load(base: &Path, component: &str) -> Option<Self> {
        match Self::read(base, component) {
            Ok(marker) => marker,
            Err(e) => {
                log::warn!("Ignoring marker: {}", e);
                None
            }
        }
    }

    pub fn remove(base: &Path, component: &str) -> Result<(), InstallError> {
        let path = Self::path(base, component);
        utils::remove_path(&path).map_err(InstallError::io(&path))
    }
}
