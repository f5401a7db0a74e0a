//! # Kiln Core Command Runner
//!
//! Runs external programs on behalf of the stages.
//!
//! - [`CommandSpec`] describes one invocation (program, arguments, extra
//!   environment, working directory, timeout).
//! - [`CommandRunner::run`] streams each output line to an [`OutputSink`] as
//!   it is produced and keeps a bounded tail of both streams for diagnostics.
//! - A timeout or a fired [`CancelSignal`] kills the child's process group.
pub mod cancel;
pub mod error;
pub mod runner;
pub mod sink;

pub use cancel::CancelSignal;
pub use error::CommandError;
pub use runner::{CommandOutput, CommandRunner, CommandSpec};
pub use sink::{CollectSink, LogSink, NullSink, OutputSink, OutputTail, Stream};

#[cfg(test)]
mod tests;
