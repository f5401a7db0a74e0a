use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::archive::error::ProvisionError;
use crate::archive::http::HttpClient;
use crate::archive::nightly;
use crate::command::CancelSignal;

const PROGRESS_STEP: u64 = 256 * 1024 * 1024;

/// Where a runtime archive comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Explicit URL, optionally pinned to a SHA-256 digest
    Url { url: String, sha256: Option<String> },
    /// Newest nightly tarball for a platform and GPU target
    Nightly { platform: String, target: String },
    /// Archive already on disk
    Local(PathBuf),
}

impl SourceSpec {
    /// Stable identity recorded in version markers
    pub fn identity(&self) -> String {
        match self {
            SourceSpec::Url { url, .. } => url.clone(),
            SourceSpec::Nightly { platform, target } => format!("nightly:{}:{}", platform, target),
            SourceSpec::Local(path) => path.display().to_string(),
        }
    }

    /// File name of this source in the cache; `None` for local archives
    pub fn cache_key(&self) -> Option<String> {
        match self {
            SourceSpec::Url { url, .. } => Some(url_cache_key(url)),
            SourceSpec::Nightly { platform, target } => Some(format!("nightly-{}-{}.tar.gz", platform, target)),
            SourceSpec::Local(_) => None,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

/// `<first 16 hex chars of sha256(url)>-<basename>`
pub fn url_cache_key(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let basename: String = path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("archive")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("{}-{}", &digest[..16], basename)
}

/// Fetches runtime archives into a local cache.
///
/// A file present at its cache key is trusted as-is and returned without any
/// transfer. Transfers stream into a temporary file in the cache directory
/// that only becomes visible under the key once complete and verified.
#[derive(Clone)]
pub struct ArchiveProvisioner {
    client: Arc<dyn HttpClient>,
    cancel: CancelSignal,
}

impl fmt::Debug for ArchiveProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveProvisioner").finish_non_exhaustive()
    }
}

impl ArchiveProvisioner {
    pub fn new(client: Arc<dyn HttpClient>, cancel: CancelSignal) -> Self {
        Self { client, cancel }
    }

    /// Return a local path to the archive described by `source`
    pub async fn ensure(&self, source: &SourceSpec, cache_dir: &Path) -> Result<PathBuf, ProvisionError> {
        match source {
            SourceSpec::Local(path) if path.is_file() => Ok(path.clone()),
            SourceSpec::Local(path) => Err(ProvisionError::SourceUnreachable {
                location: path.display().to_string(),
                reason: "file does not exist".to_string(),
            }),
            SourceSpec::Url { url, sha256 } => {
                let key = url_cache_key(url);
                if let Some(hit) = cache_hit(cache_dir, &key) {
                    return Ok(hit);
                }
                self.download(url, sha256.as_deref(), cache_dir, &key).await
            }
            SourceSpec::Nightly { platform, target } => {
                let key = format!("nightly-{}-{}.tar.gz", platform, target);
                if let Some(hit) = cache_hit(cache_dir, &key) {
                    return Ok(hit);
                }
                let candidate = nightly::newest(self.client.as_ref(), platform, target).await?;
                log::info!("Newest nightly for {}/{}: {}", platform, target, candidate.version);
                self.download(&candidate.url, None, cache_dir, &key).await
            }
        }
    }

    async fn download(
        &self,
        url: &str,
        sha256: Option<&str>,
        cache_dir: &Path,
        key: &str,
    ) -> Result<PathBuf, ProvisionError> {
        let expected_len = self.client.probe(url).await.map_err(|e| ProvisionError::SourceUnreachable {
            location: url.to_string(),
            reason: e.to_string(),
        })?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |error: std::io::Error| ProvisionError::Io { path, error }
        };
        tokio::fs::create_dir_all(cache_dir).await.map_err(io_err(cache_dir))?;

        // Removed on drop unless persisted
        let part = tempfile::Builder::new()
            .prefix(&format!(".{}.", key))
            .suffix(".part")
            .tempfile_in(cache_dir)
            .map_err(io_err(cache_dir))?;
        let handle = part.as_file().try_clone().map_err(io_err(part.path()))?;
        let mut file = tokio::fs::File::from_std(handle);

        let failed = |reason: String| ProvisionError::DownloadFailed { url: url.to_string(), reason };

        log::info!("Downloading {}", url);
        let mut stream = self.client.fetch(url).await.map_err(|e| failed(e.to_string()))?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut next_report = PROGRESS_STEP;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    log::warn!("Download of {} interrupted, discarding partial file", url);
                    return Err(ProvisionError::Interrupted { url: url.to_string() });
                }
                chunk = stream.next() => chunk,
            };
            let bytes = match chunk {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(failed(e.to_string())),
            };
            hasher.update(&bytes);
            file.write_all(&bytes).await.map_err(|e| write_failed(url, part.path(), e))?;
            written += bytes.len() as u64;
            if written >= next_report {
                log::info!("{} MiB received", written / (1024 * 1024));
                next_report += PROGRESS_STEP;
            }
        }
        file.flush().await.map_err(|e| write_failed(url, part.path(), e))?;
        file.sync_all().await.map_err(|e| write_failed(url, part.path(), e))?;
        drop(file);

        if let Some(expected) = expected_len {
            if written != expected {
                return Err(failed(format!("truncated transfer: received {} of {} bytes", written, expected)));
            }
        }
        if let Some(expected) = sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(ProvisionError::ChecksumMismatch {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let dest = cache_dir.join(key);
        part.persist(&dest).map_err(|e| ProvisionError::Io { path: dest.clone(), error: e.error })?;
        log::info!("Cached {} ({} bytes)", dest.display(), written);
        Ok(dest)
    }
}

/// Disk trouble while the body is arriving fails the download itself
pub(crate) fn write_failed(url: &str, part: &Path, error: std::io::Error) -> ProvisionError {
    ProvisionError::DownloadFailed { url: url.to_string(), reason: format!("writing {}: {}", part.display(), error) }
}

fn cache_hit(cache_dir: &Path, key: &str) -> Option<PathBuf> {
    let cached = cache_dir.join(key);
    if cached.is_file() {
        log::info!("Using cached archive {}", cached.display());
        Some(cached)
    } else {
        None
    }
}
