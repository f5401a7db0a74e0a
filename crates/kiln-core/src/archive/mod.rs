//! # Kiln Core Archive Provisioning
//!
//! Turns a [`SourceSpec`] (explicit URL, nightly tarball, or local file) into
//! a path inside the archive cache.
//!
//! Transfers go through the [`HttpClient`] trait; [`ReqwestClient`] is the
//! production implementation. The [`nightly`] submodule reads TheRock's
//! public bucket listing to find the newest runtime tarball for a GPU target.
pub mod error;
pub mod http;
pub mod nightly;
pub mod provisioner;

pub use error::{ProvisionError, TransferError};
pub use http::{ByteStream, HttpClient, ReqwestClient};
pub use nightly::{NightlyCandidate, NightlyVersion};
pub use provisioner::{ArchiveProvisioner, SourceSpec, url_cache_key};

#[cfg(test)]
pub(crate) mod tests;
