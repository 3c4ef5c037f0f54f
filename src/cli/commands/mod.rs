//! CLI command implementations.
//!
//! Each command implements the [`Command`] trait and writes its report to
//! the writer it is given. Diagnostics go through `tracing`.

pub mod apply;
pub mod check;
pub mod completions;
pub mod dispatcher;
pub mod show;

pub use dispatcher::{Command, CommandDispatcher, CommandResult};
