//! Command-line interface for Conductor.
//!
//! # Architecture
//!
//! - [`args`] - Argument definitions using clap derive macros
//! - [`commands`] - Command implementations

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, CompletionsArgs, DescriptorArgs};
pub use commands::{Command, CommandDispatcher, CommandResult};
