//! # Kiln Core Kernel
//!
//! System-wide constants and the error aggregate shared by every subsystem.
//!
//! - **Core Constants**: defaults and well-known names via the `constants` submodule.
//! - **Error Handling**: the crate-wide [`Error`](error::Error), its `Result`
//!   alias and the exit-code taxonomy in the `error` submodule.
pub mod constants;
pub mod error;

pub use error::{Error, Result, exit_code};
