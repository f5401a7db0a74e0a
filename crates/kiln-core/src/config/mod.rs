//! # Kiln Core Configuration
//!
//! Resolves the immutable [`ConfigSnapshot`] a run works from.
//!
//! Settings are layered as [`PartialConfig`] values: built-in defaults, then
//! the configuration file, then the process environment, then command-line
//! flags. The merge is field-wise and the last layer to set a field wins.
//! The environment is passed in as a map so [`resolve`] never reads process
//! state itself.
pub mod error;
pub mod format;
pub mod resolver;
pub mod snapshot;

pub use error::ConfigError;
pub use format::ConfigFormat;
pub use resolver::{ConfigFile, PartialConfig, resolve};
pub use snapshot::{ConfigSnapshot, Timeouts};

#[cfg(test)]
mod tests;
