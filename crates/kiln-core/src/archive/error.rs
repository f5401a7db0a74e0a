//! # Kiln Core Archive Errors
//!
//! [`ProvisionError`] covers everything that can go wrong while turning a
//! [`SourceSpec`](super::SourceSpec) into a verified file in the cache, and
//! [`TransferError`] is what an [`HttpClient`](super::HttpClient) reports.
use std::path::PathBuf;
use thiserror::Error;

use crate::kernel::exit_code;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Source unreachable: {location}: {reason}")]
    SourceUnreachable { location: String, reason: String },

    #[error("Download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch { url: String, expected: String, actual: String },

    #[error("No nightly tarball found for platform '{platform}' and target '{target}'")]
    NightlyNotFound { platform: String, target: String },

    #[error("Download of {url} interrupted")]
    Interrupted { url: String },

    #[error("I/O error at '{}': {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl ProvisionError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ProvisionError::Interrupted { .. } => exit_code::INTERRUPTED,
            _ => exit_code::DOWNLOAD_FAILED,
        }
    }
}
