//! # Kiln Core Installation Records
//!
//! Tracks an installed tree at its canonical path together with the sibling
//! locations used to replace it safely, and the version markers that record
//! what is installed.
//!
//! - [`InstallationRecord`]: backup / commit / restore, archive and
//!   restore-from-archive, recovery of stale backups.
//! - [`BackupGuard`]: the scoped backup held while a stage acts.
//! - [`VersionMarker`]: JSON marker read by idempotency checks.
pub mod error;
pub mod marker;
pub mod record;

pub use error::InstallError;
pub use marker::VersionMarker;
pub use record::{BackupGuard, InstallationRecord, RecordState};
